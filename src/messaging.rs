//! Heartbeat traffic over established streams: the periodic send loop and the
//! per-peer receive loop.

use crate::mesh::Mesh;
use crate::peers::Session;
use crate::proto::Message;
use crate::select_stream_or_shutdown::select_stream_or_shutdown;
use crate::types::{GenericBoxedStream, PeerId};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tonic::{Status, Streaming};
use tracing::{debug, info, warn};

/// Produces the opaque payload of each heartbeat.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// Random alphanumeric tokens.
pub struct RandomTokens {
    len: usize,
}

impl RandomTokens {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomTokens {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TokenSource for RandomTokens {
    fn next_token(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect()
    }
}

/// Where a received message came in.
#[derive(Clone, Copy, Debug)]
pub enum ReceivedOn<'a> {
    /// A stream some peer opened to us.
    Inbound,
    /// The reply half of our own stream to this peer.
    Outbound(&'a PeerId),
}

/// Receives every message the node reads off a stream.
pub trait Observer: Send + Sync {
    fn received(&self, on: ReceivedOn<'_>, message: &Message);
}

/// Default observer: messages are only logged by the loops themselves.
pub struct LogObserver;

impl Observer for LogObserver {
    fn received(&self, _on: ReceivedOn<'_>, _message: &Message) {}
}

/// Outcome of one send tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    /// Queue full; message skipped for this peer only.
    pub dropped: usize,
    /// Stream closed; cleanup scheduled.
    pub failed: usize,
}

impl Mesh {
    /// Send one message to every active stream.
    pub async fn send_tick(&self) -> SendReport {
        let active = self.table.active_snapshot().await;
        let mut report = SendReport::default();
        if active.is_empty() {
            return report;
        }

        let content = self.tokens.next_token();
        info!(content = %content, neighbors = active.len(), "Sending message to neighbors");

        for peer in active {
            let message = Message::new(self.local().as_str(), content.as_str());
            match peer.stream.try_send(message) {
                Ok(()) => {
                    report.sent += 1;
                    debug!(peer = %peer.identity, content = %content, "Sent message");
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(peer = %peer.identity, "Outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    warn!(peer = %peer.identity, "Error sending message, stream closed");
                    self.spawn_session_cleanup(peer.identity, peer.session);
                }
            }
        }

        report
    }

    pub async fn run_send_loop(self) {
        let period = self.config.message_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Send loop: shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    self.send_tick().await;
                }
            }
        }
    }

    /// Drain replies from `peer` until the stream fails, ends or the node
    /// shuts down. Sole reader of `inbound`.
    pub async fn run_receive_loop(
        self,
        peer: PeerId,
        session: Session,
        inbound: Streaming<Message>,
    ) {
        let mut inbound: GenericBoxedStream<Result<Message, Status>> = Box::pin(inbound);

        loop {
            match select_stream_or_shutdown(inbound.as_mut(), &self.shutdown).await {
                Ok(Some(Ok(message))) => {
                    info!(
                        peer = %peer,
                        sender = %message.sender,
                        content = %message.content,
                        "Received message"
                    );
                    self.observer.received(ReceivedOn::Outbound(&peer), &message);
                }
                Ok(Some(Err(status))) => {
                    warn!(peer = %peer, error = %status, "Error receiving message");
                    self.handle_session_failure(&peer, session).await;
                    break;
                }
                Ok(None) => {
                    info!(peer = %peer, "Neighbor closed the stream");
                    self.handle_session_failure(&peer, session).await;
                    break;
                }
                Err(()) => {
                    debug!(peer = %peer, "Receive loop: shutdown signal received");
                    break;
                }
            }
        }
    }
}
