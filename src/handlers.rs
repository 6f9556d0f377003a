use crate::messaging::{Observer, ReceivedOn};
use crate::proto::neighbor_service_server::NeighborService;
use crate::proto::Message;
use crate::select_stream_or_shutdown::select_stream_or_shutdown;
use crate::types::{GenericBoxedStream, PeerId};
use async_stream::stream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info};

/// Server side of `Communicate` for peers that dialed this node.
///
/// Acknowledges every message on the same stream. Inbound streams are not
/// tracked in the connection table.
#[derive(Clone)]
pub struct NeighborHandler {
    local: PeerId,
    observer: Arc<dyn Observer>,
    shutdown: CancellationToken,
}

impl NeighborHandler {
    pub fn new(local: PeerId, observer: Arc<dyn Observer>, shutdown: CancellationToken) -> Self {
        Self {
            local,
            observer,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl NeighborService for NeighborHandler {
    type CommunicateStream = GenericBoxedStream<Result<Message, Status>>;

    async fn communicate(
        &self,
        request: Request<Streaming<Message>>,
    ) -> Result<Response<Self::CommunicateStream>, Status> {
        let remote = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(remote = %remote, "Established communication stream with neighbor");

        let mut inbound: GenericBoxedStream<Result<Message, Status>> =
            Box::pin(request.into_inner());
        let handler = self.clone();

        let replies = stream! {
            loop {
                match select_stream_or_shutdown(inbound.as_mut(), &handler.shutdown).await {
                    Ok(Some(Ok(message))) => {
                        info!(
                            sender = %message.sender,
                            content = %message.content,
                            "Received message"
                        );
                        handler.observer.received(ReceivedOn::Inbound, &message);
                        yield Ok(message.ack(handler.local.as_str()));
                    }
                    Ok(Some(Err(status))) => {
                        error!(remote = %remote, error = %status, "Error receiving message");
                        yield Err(status);
                        break;
                    }
                    Ok(None) => {
                        info!(remote = %remote, "Neighbor closed its stream");
                        break;
                    }
                    Err(()) => {
                        debug!(remote = %remote, "Closing inbound stream for shutdown");
                        break;
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(replies)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::RecordingObserver;
    use crate::proto::neighbor_service_client::NeighborServiceClient;
    use crate::server_loop::serve_inbound;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    async fn start_server(
        shutdown: CancellationToken,
    ) -> (
        String,
        mpsc::UnboundedReceiver<(Option<PeerId>, Message)>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        let (observer, seen) = RecordingObserver::new();
        let handler = NeighborHandler::new(PeerId::new("node2"), observer, shutdown.clone());
        let server = tokio::spawn(async move {
            serve_inbound(listener, handler, shutdown)
                .await
                .unwrap();
        });
        (uri, seen, server)
    }

    #[tokio::test]
    async fn test_each_message_is_acknowledged() {
        let shutdown = CancellationToken::new();
        let (uri, mut seen, server) = start_server(shutdown.clone()).await;

        let mut client = NeighborServiceClient::connect(uri).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut replies = client
            .communicate(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();

        for content in ["first", "second"] {
            tx.send(Message::new("node1", content)).await.unwrap();
            let ack = replies.message().await.unwrap().unwrap();
            assert_eq!(ack.sender, "node2");
            assert_eq!(ack.content, format!("ACK: {}", content));

            let (on, original) = seen.recv().await.unwrap();
            assert!(on.is_none());
            assert_eq!(original.sender, "node1");
            assert_eq!(original.content, content);
        }

        // client half-close ends the reply stream cleanly
        drop(tx);
        assert!(replies.message().await.unwrap().is_none());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        let shutdown = CancellationToken::new();
        let (uri, _seen, server) = start_server(shutdown.clone()).await;

        let mut client = NeighborServiceClient::connect(uri).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut replies = client
            .communicate(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        tx.send(Message::new("node1", "ping")).await.unwrap();
        assert!(replies.message().await.unwrap().is_some());

        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(5), replies.message())
            .await
            .expect("stream ends on shutdown");
        assert!(!matches!(end, Ok(Some(_))));

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        drop(tx);
    }
}
