use crate::accept_stream::tcp_accept_stream;
use crate::handlers::NeighborHandler;
use crate::proto::neighbor_service_server::NeighborServiceServer;
use crate::types::GenericBoxedStream;

use std::io;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

/// Serve inbound `Communicate` streams until `shutdown` fires.
///
/// On shutdown the listener stops accepting and open streams are given the
/// chance to finish before this returns.
pub async fn serve_inbound(
    listener: TcpListener,
    handler: NeighborHandler,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let incoming: GenericBoxedStream<Result<TcpStream, io::Error>> =
        Box::pin(tcp_accept_stream(listener));

    Server::builder()
        .add_service(NeighborServiceServer::new(handler))
        .serve_with_incoming_shutdown(incoming, shutdown.cancelled())
        .await?;

    info!("Inbound server stopped");
    Ok(())
}
