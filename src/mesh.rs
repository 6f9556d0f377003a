//! State shared by every background task of a running node.

use crate::config::NodeConfig;
use crate::directory::PeerDirectory;
use crate::messaging::{Observer, TokenSource};
use crate::table::ConnectionTable;
use crate::types::PeerId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cheap to clone; every clone refers to the same table and shutdown signal.
#[derive(Clone)]
pub struct Mesh {
    pub config: Arc<NodeConfig>,
    pub directory: Arc<PeerDirectory>,
    pub table: ConnectionTable,
    pub shutdown: CancellationToken,
    /// Per-peer connector, receive loop and cleanup tasks.
    pub tracker: TaskTracker,
    pub observer: Arc<dyn Observer>,
    pub tokens: Arc<dyn TokenSource>,
}

impl Mesh {
    pub fn new(
        config: NodeConfig,
        directory: PeerDirectory,
        observer: Arc<dyn Observer>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            directory: Arc::new(directory),
            table: ConnectionTable::new(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            observer,
            tokens,
        }
    }

    pub fn local(&self) -> &PeerId {
        self.directory.local()
    }
}
