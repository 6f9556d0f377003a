//! Periodic reachability probing of every candidate peer.
//!
//! A probe is a bare TCP connect that is closed immediately. It is
//! independent of the RPC stream: a peer that stops answering probes is torn
//! down even if its stream still looks healthy.

use crate::mesh::Mesh;
use crate::table::Reachability;
use crate::types::{PeerAddress, PeerId};
use futures_util::future::join_all;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Whether something accepts TCP connections at `address` within `timeout`.
pub async fn probe(address: &PeerAddress, timeout: Duration) -> io::Result<()> {
    let stream = time::timeout(timeout, TcpStream::connect(address.as_str()))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "probe timed out"))??;
    drop(stream);
    Ok(())
}

/// Outcome of one discovery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub discovered: Vec<PeerId>,
    /// Known but unconnected peers handed to a new connector.
    pub retried: Vec<PeerId>,
    pub lost: Vec<PeerId>,
    pub neighbors: usize,
}

impl Mesh {
    /// Probe all candidates concurrently, then apply the results in
    /// candidate order.
    pub async fn discover_once(&self) -> DiscoveryReport {
        let timeout = self.config.probe_timeout;
        let probes = self.directory.candidates().iter().map(|peer| {
            let address = self.directory.resolve(peer);
            async move {
                let result = probe(&address, timeout).await;
                (peer.clone(), address, result)
            }
        });
        let results = join_all(probes).await;

        let mut report = DiscoveryReport::default();
        for (peer, address, result) in results {
            match result {
                Ok(()) => {
                    let reachability = self.table.mark_reachable(&peer, address.clone()).await;
                    match reachability {
                        Reachability::Inserted => {
                            info!(peer = %peer, address = %address, "New neighbor discovered");
                            report.discovered.push(peer.clone());
                        }
                        Reachability::Idle => {
                            debug!(peer = %peer, address = %address, "Retrying connection to neighbor");
                            report.retried.push(peer.clone());
                        }
                        Reachability::Known => {}
                    }

                    if reachability.needs_connector() {
                        let mesh = self.clone();
                        self.tracker.spawn(async move { mesh.connect_peer(peer).await });
                    }
                }
                Err(e) => {
                    debug!(peer = %peer, address = %address, error = %e, "Neighbor not available");
                    if self.handle_failure(&peer).await {
                        report.lost.push(peer);
                    }
                }
            }
        }

        report.neighbors = self.table.len().await;
        info!(neighbors = report.neighbors, "Discovery complete");
        report
    }

    pub async fn run_discovery_loop(self) {
        // First tick fires immediately.
        let mut ticker = time::interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Discovery loop: shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    info!("Discovering neighbors");
                    self.discover_once().await;
                }
            }
        }
    }
}
