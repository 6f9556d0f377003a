use crate::proto::Message;
use crate::types::{PeerAddress, PeerId};
use tokio::sync::mpsc;
use tonic::transport::Channel;

/// Connection to a peer's RPC endpoint.
pub type Transport = Channel;

/// Sending half of the request stream of an open `Communicate` call.
pub type OutboundStream = mpsc::Sender<Message>;

/// Identifies one lifetime of a record. A peer that is removed and rediscovered
/// gets a new session.
pub type Session = u64;

/// Progress of the outbound relationship with a peer.
///
/// A stream can only exist alongside the transport it runs on.
#[derive(Debug)]
pub enum PeerState {
    /// Answered the last probe; no dial attempted yet.
    Reachable,
    /// Transport established, stream handshake in progress.
    Connecting { transport: Transport },
    Active {
        transport: Transport,
        stream: OutboundStream,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Reachable,
    Connecting,
    Active,
}

#[derive(Debug)]
pub struct PeerRecord {
    pub identity: PeerId,
    pub address: PeerAddress,
    pub session: Session,
    pub state: PeerState,
    /// A connector has claimed this record and is dialing it.
    pub dialing: bool,
}

impl PeerRecord {
    pub fn new(identity: PeerId, address: PeerAddress, session: Session) -> Self {
        Self {
            identity,
            address,
            session,
            state: PeerState::Reachable,
            dialing: false,
        }
    }

    pub fn status(&self) -> PeerStatus {
        match self.state {
            PeerState::Reachable => PeerStatus::Reachable,
            PeerState::Connecting { .. } => PeerStatus::Connecting,
            PeerState::Active { .. } => PeerStatus::Active,
        }
    }

    pub fn view(&self) -> PeerView {
        PeerView {
            identity: self.identity.clone(),
            address: self.address.clone(),
            session: self.session,
            status: self.status(),
        }
    }

    pub fn into_handles(self) -> Detached {
        let (transport, stream) = match self.state {
            PeerState::Reachable => (None, None),
            PeerState::Connecting { transport } => (Some(transport), None),
            PeerState::Active { transport, stream } => (Some(transport), Some(stream)),
        };
        Detached {
            identity: self.identity,
            transport,
            stream,
        }
    }
}

/// Read-only copy of a record, safe to hold outside the table lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerView {
    pub identity: PeerId,
    pub address: PeerAddress,
    pub session: Session,
    pub status: PeerStatus,
}

/// Handles taken out of the table by a removal, to be closed by the caller.
#[derive(Debug)]
pub struct Detached {
    pub identity: PeerId,
    pub transport: Option<Transport>,
    pub stream: Option<OutboundStream>,
}

impl Detached {
    /// Ends the request stream first so the peer sees a clean half-close, then
    /// releases the transport.
    pub fn close(self) -> PeerStatus {
        let status = match (&self.transport, &self.stream) {
            (Some(_), Some(_)) => PeerStatus::Active,
            (Some(_), None) => PeerStatus::Connecting,
            _ => PeerStatus::Reachable,
        };
        drop(self.stream);
        drop(self.transport);
        status
    }
}
