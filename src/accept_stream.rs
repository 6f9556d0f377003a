use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Turn a listener into a stream of accepted connections for the RPC server.
///
/// Accept errors are logged and skipped so one bad accept never takes the
/// listener down.
pub fn tcp_accept_stream(listener: TcpListener) -> impl Stream<Item = Result<TcpStream, io::Error>> {
    stream! {
        loop {
            let (stream, addr): (TcpStream, SocketAddr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "TCP accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(remote = %addr, error = %e, "Failed to set TCP_NODELAY");
            }
            debug!(remote = %addr, "Accepted connection");
            yield Ok(stream);
        }
    }
}
