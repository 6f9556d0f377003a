//! Promotes a reachable peer to an active stream: dial, then open the
//! `Communicate` call. Started by discovery for every reachable peer that
//! no connector holds.

use crate::mesh::Mesh;
use crate::peers::{OutboundStream, Transport};
use crate::proto::neighbor_service_client::NeighborServiceClient;
use crate::proto::Message;
use crate::types::{PeerAddress, PeerId};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Endpoint;
use tonic::Streaming;
use tracing::{debug, error, info, warn};

/// Messages queued per outbound stream before the send loop starts dropping.
const OUTBOUND_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid endpoint {0}: {1}")]
    Endpoint(PeerAddress, #[source] tonic::transport::Error),
    #[error("dial failed: {0}")]
    Dial(#[source] tonic::transport::Error),
    #[error("stream handshake failed: {0}")]
    Handshake(#[source] tonic::Status),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Establish the RPC transport to `address`.
pub async fn dial(address: &PeerAddress, timeout: Duration) -> Result<Transport, ConnectError> {
    let endpoint = Endpoint::from_shared(address.to_uri())
        .map_err(|e| ConnectError::Endpoint(address.clone(), e))?
        .connect_timeout(timeout);

    time::timeout(timeout, endpoint.connect())
        .await
        .map_err(|_| ConnectError::Timeout(timeout))?
        .map_err(ConnectError::Dial)
}

/// Open a bidirectional `Communicate` stream over `transport`. Returns the
/// sending half of the request stream and the reply stream.
pub async fn open_stream(
    transport: Transport,
    timeout: Duration,
) -> Result<(OutboundStream, Streaming<Message>), ConnectError> {
    let (outbound, requests) = mpsc::channel(OUTBOUND_QUEUE);
    let mut client = NeighborServiceClient::new(transport);

    let response = time::timeout(timeout, client.communicate(ReceiverStream::new(requests)))
        .await
        .map_err(|_| ConnectError::Timeout(timeout))?
        .map_err(ConnectError::Handshake)?;

    Ok((outbound, response.into_inner()))
}

impl Mesh {
    pub async fn connect_peer(&self, peer: PeerId) {
        if self.shutdown.is_cancelled() {
            return;
        }
        // Another connector or a cleanup may have got here first.
        let Some(view) = self.table.begin_dial(&peer).await else {
            return;
        };
        let timeout = self.config.connect_timeout;

        info!(peer = %peer, address = %view.address, "Connecting to neighbor");
        let transport = match dial(&view.address, timeout).await {
            Ok(transport) => transport,
            Err(e) => {
                // Record stays; the next discovery tick retries or demotes it.
                error!(peer = %peer, error = %e, "Failed to connect to neighbor");
                self.table.end_dial(&peer, view.session).await;
                return;
            }
        };

        if let Err(e) = self
            .table
            .attach_transport(&peer, view.session, transport.clone())
            .await
        {
            debug!(peer = %peer, reason = %e, "Dropping transport");
            return;
        }
        info!(peer = %peer, "Connected to neighbor");

        let (outbound, inbound) = match open_stream(transport, timeout).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(peer = %peer, error = %e, "Failed to establish stream with neighbor");
                self.handle_session_failure(&peer, view.session).await;
                return;
            }
        };

        if let Err(e) = self.table.attach_stream(&peer, view.session, outbound).await {
            warn!(peer = %peer, reason = %e, "Neighbor went away during handshake");
            return;
        }
        info!(peer = %peer, "Established stream with neighbor");

        let mesh = self.clone();
        self.tracker
            .spawn(mesh.run_receive_loop(peer, view.session, inbound));
    }
}
