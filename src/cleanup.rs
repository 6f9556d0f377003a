//! The single teardown path for peer records.
//!
//! Discovery, the send loop and receive loops all end up here. Handles are
//! taken out of the table under the lock and closed after it is released.

use crate::mesh::Mesh;
use crate::peers::{Detached, Session};
use crate::types::PeerId;
use tracing::info;

impl Mesh {
    /// Forget `id` and close whatever it held. Safe to call for a peer that
    /// is already gone; returns whether a record was removed.
    pub async fn handle_failure(&self, id: &PeerId) -> bool {
        let detached = self.table.remove(id).await;
        release(detached)
    }

    /// Same as [`Mesh::handle_failure`], but only if the record still belongs
    /// to `session`. Used by tasks bound to one connection attempt.
    pub async fn handle_session_failure(&self, id: &PeerId, session: Session) -> bool {
        let detached = self.table.remove_session(id, session).await;
        release(detached)
    }

    /// Run [`Mesh::handle_session_failure`] in the background.
    pub fn spawn_session_cleanup(&self, id: PeerId, session: Session) {
        let mesh = self.clone();
        self.tracker.spawn(async move {
            mesh.handle_session_failure(&id, session).await;
        });
    }

    /// Close every outbound transport. Returns how many records were dropped.
    pub async fn close_all(&self) -> usize {
        let drained = self.table.drain().await;
        let count = drained.len();
        for detached in drained {
            detached.close();
        }
        count
    }
}

fn release(detached: Option<Detached>) -> bool {
    match detached {
        Some(detached) => {
            let peer = detached.identity.clone();
            let state = detached.close();
            info!(peer = %peer, last_state = ?state, "Neighbor disconnected");
            true
        }
        None => false,
    }
}
