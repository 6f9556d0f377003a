use futures_util::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Await the next item from a stream or the node's shutdown signal.
///
/// - Returns `Ok(Some(item))` when the stream yields
/// - Returns `Ok(None)` when the stream ends
/// - Returns `Err(())` on shutdown
pub async fn select_stream_or_shutdown<T>(
    mut stream: Pin<&mut (dyn Stream<Item = T> + Send)>,
    shutdown: &CancellationToken,
) -> Result<Option<T>, ()> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(()),
        item = stream.next() => Ok(item),
    }
}
