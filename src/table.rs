//! Shared per-peer connection state.
//!
//! Every operation takes the lock once, never across network I/O. Handles
//! leave the table only through [`ConnectionTable::remove`] and friends,
//! so the caller can close them after the lock is released.

use crate::peers::{
    Detached, OutboundStream, PeerRecord, PeerState, PeerView, Session, Transport,
};
use crate::types::{PeerAddress, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("peer {0} is not in the connection table")]
    Absent(PeerId),
    #[error("record for peer {0} belongs to a newer session")]
    StaleSession(PeerId),
    #[error("peer {0} already has a transport")]
    TransportPresent(PeerId),
    #[error("peer {0} has no transport to open a stream on")]
    NoTransport(PeerId),
    #[error("peer {0} already has an active stream")]
    StreamPresent(PeerId),
}

/// What [`ConnectionTable::mark_reachable`] found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reachability {
    /// No record existed; a fresh one was inserted.
    Inserted,
    /// Record is still `Reachable` and no connector holds it, e.g. after a
    /// failed dial.
    Idle,
    /// Record is being dialed or is past `Reachable`.
    Known,
}

impl Reachability {
    /// Whether a connector should be started for the peer.
    pub fn needs_connector(self) -> bool {
        self != Reachability::Known
    }
}

/// An active stream as seen by the send loop.
#[derive(Clone, Debug)]
pub struct ActivePeer {
    pub identity: PeerId,
    pub session: Session,
    pub stream: OutboundStream,
}

#[derive(Clone, Default)]
pub struct ConnectionTable {
    records: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
    sessions: Arc<AtomicU64>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &PeerId) -> Option<PeerView> {
        self.records.read().await.get(id).map(PeerRecord::view)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Insert a bare record for a peer that answered a probe. An existing
    /// record is left as is.
    pub async fn mark_reachable(&self, id: &PeerId, address: PeerAddress) -> Reachability {
        let mut records = self.records.write().await;
        if let Some(record) = records.get(id) {
            return match record.state {
                PeerState::Reachable if !record.dialing => Reachability::Idle,
                _ => Reachability::Known,
            };
        }
        let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        records.insert(id.clone(), PeerRecord::new(id.clone(), address, session));
        Reachability::Inserted
    }

    /// Claim an idle `Reachable` record for dialing. Only one connector at a
    /// time gets the record.
    pub async fn begin_dial(&self, id: &PeerId) -> Option<PeerView> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) if matches!(record.state, PeerState::Reachable) && !record.dialing => {
                record.dialing = true;
                Some(record.view())
            }
            _ => None,
        }
    }

    /// Release a claim taken by [`ConnectionTable::begin_dial`] without
    /// attaching a transport.
    pub async fn end_dial(&self, id: &PeerId, session: Session) {
        let mut records = self.records.write().await;
        if let Ok(record) = session_record(&mut records, id, session) {
            record.dialing = false;
        }
    }

    /// `Reachable -> Connecting`. A second transport for the same record is
    /// refused and dropped.
    pub async fn attach_transport(
        &self,
        id: &PeerId,
        session: Session,
        transport: Transport,
    ) -> Result<(), AttachError> {
        let mut records = self.records.write().await;
        let record = session_record(&mut records, id, session)?;

        match record.state {
            PeerState::Reachable => {
                record.state = PeerState::Connecting { transport };
                record.dialing = false;
                Ok(())
            }
            _ => Err(AttachError::TransportPresent(id.clone())),
        }
    }

    /// `Connecting -> Active`.
    pub async fn attach_stream(
        &self,
        id: &PeerId,
        session: Session,
        stream: OutboundStream,
    ) -> Result<(), AttachError> {
        let mut records = self.records.write().await;
        let record = session_record(&mut records, id, session)?;

        match std::mem::replace(&mut record.state, PeerState::Reachable) {
            PeerState::Connecting { transport } => {
                record.state = PeerState::Active { transport, stream };
                Ok(())
            }
            PeerState::Reachable => Err(AttachError::NoTransport(id.clone())),
            active @ PeerState::Active { .. } => {
                record.state = active;
                Err(AttachError::StreamPresent(id.clone()))
            }
        }
    }

    /// Delete the record for `id` whatever its session.
    pub async fn remove(&self, id: &PeerId) -> Option<Detached> {
        self.records
            .write()
            .await
            .remove(id)
            .map(PeerRecord::into_handles)
    }

    /// Delete the record for `id` only if it still belongs to `session`.
    pub async fn remove_session(&self, id: &PeerId, session: Session) -> Option<Detached> {
        let mut records = self.records.write().await;
        match records.get(id) {
            Some(record) if record.session == session => {
                records.remove(id).map(PeerRecord::into_handles)
            }
            _ => None,
        }
    }

    /// Remove every record, e.g. on shutdown.
    pub async fn drain(&self) -> Vec<Detached> {
        self.records
            .write()
            .await
            .drain()
            .map(|(_, record)| record.into_handles())
            .collect()
    }

    /// Point-in-time copy of all active streams, ordered by peer id.
    pub async fn active_snapshot(&self) -> Vec<ActivePeer> {
        let records = self.records.read().await;
        let mut active: Vec<ActivePeer> = records
            .values()
            .filter_map(|record| match &record.state {
                PeerState::Active { stream, .. } => Some(ActivePeer {
                    identity: record.identity.clone(),
                    session: record.session,
                    stream: stream.clone(),
                }),
                _ => None,
            })
            .collect();
        active.sort_by(|a, b| a.identity.cmp(&b.identity));
        active
    }

    /// All records, ordered by peer id.
    pub async fn views(&self) -> Vec<PeerView> {
        let records = self.records.read().await;
        let mut views: Vec<PeerView> = records.values().map(PeerRecord::view).collect();
        views.sort_by(|a, b| a.identity.cmp(&b.identity));
        views
    }
}

fn session_record<'a>(
    records: &'a mut HashMap<PeerId, PeerRecord>,
    id: &PeerId,
    session: Session,
) -> Result<&'a mut PeerRecord, AttachError> {
    match records.get_mut(id) {
        Some(record) if record.session == session => Ok(record),
        Some(_) => Err(AttachError::StaleSession(id.clone())),
        None => Err(AttachError::Absent(id.clone())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::peers::PeerStatus;
    use crate::proto::Message;
    use tokio::sync::mpsc;
    use tonic::transport::Endpoint;

    /// A transport that never dials until used.
    pub(crate) fn lazy_transport() -> Transport {
        Endpoint::from_static("http://127.0.0.1:9").connect_lazy()
    }

    async fn reachable(table: &ConnectionTable, name: &str) -> (PeerId, Session) {
        let id = PeerId::new(name);
        table.mark_reachable(&id, PeerAddress::new(name, 5001)).await;
        let session = table.get(&id).await.unwrap().session;
        (id, session)
    }

    pub(crate) async fn activate(
        table: &ConnectionTable,
        name: &str,
    ) -> (PeerId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let (id, session) = reachable(table, name).await;
        table.attach_transport(&id, session, lazy_transport()).await.unwrap();
        table.attach_stream(&id, session, tx).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_mark_reachable_only_inserts_once() {
        let table = ConnectionTable::new();
        let id = PeerId::new("service2");

        assert_eq!(
            table.mark_reachable(&id, PeerAddress::new("service2", 5001)).await,
            Reachability::Inserted
        );
        let view = table.get(&id).await.unwrap();
        assert_eq!(
            table.mark_reachable(&id, PeerAddress::new("service2", 5001)).await,
            Reachability::Idle
        );
        assert_eq!(table.len().await, 1);

        // same record, same session
        assert_eq!(table.get(&id).await.unwrap(), view);
        assert_eq!(view.status, PeerStatus::Reachable);
        assert_eq!(view.address.as_str(), "service2:5001");
    }

    #[tokio::test]
    async fn test_dial_claim_is_exclusive_and_released() {
        let table = ConnectionTable::new();
        let (id, session) = reachable(&table, "service2").await;

        assert_eq!(table.begin_dial(&id).await.map(|v| v.session), Some(session));
        assert!(table.begin_dial(&id).await.is_none());
        assert_eq!(
            table.mark_reachable(&id, PeerAddress::new("service2", 5001)).await,
            Reachability::Known
        );

        // a failed dial hands the record back
        table.end_dial(&id, session).await;
        assert_eq!(
            table.mark_reachable(&id, PeerAddress::new("service2", 5001)).await,
            Reachability::Idle
        );

        // a stale release does not free a newer claim
        assert!(table.begin_dial(&id).await.is_some());
        table.end_dial(&id, session + 100).await;
        assert!(table.begin_dial(&id).await.is_none());

        table.attach_transport(&id, session, lazy_transport()).await.unwrap();
        assert_eq!(
            table.mark_reachable(&id, PeerAddress::new("service2", 5001)).await,
            Reachability::Known
        );
        assert!(table.begin_dial(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_state_progression() {
        let table = ConnectionTable::new();
        let (id, session) = reachable(&table, "service2").await;

        table.attach_transport(&id, session, lazy_transport()).await.unwrap();
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Connecting);
        assert!(table.active_snapshot().await.is_empty());

        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(table.attach_stream(&id, session, tx).await, Ok(()));
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Active);

        let snapshot = table.active_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].session, session);
    }

    #[tokio::test]
    async fn test_double_transport_is_refused() {
        let table = ConnectionTable::new();
        let (id, session) = reachable(&table, "service2").await;

        table.attach_transport(&id, session, lazy_transport()).await.unwrap();
        assert_eq!(
            table.attach_transport(&id, session, lazy_transport()).await,
            Err(AttachError::TransportPresent(id.clone()))
        );
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Connecting);
    }

    #[tokio::test]
    async fn test_stream_requires_transport() {
        let table = ConnectionTable::new();
        let id = PeerId::new("service2");
        let (tx, _rx) = mpsc::channel(1);

        assert_eq!(
            table.attach_stream(&id, 1, tx.clone()).await,
            Err(AttachError::Absent(id.clone()))
        );

        let (id, session) = reachable(&table, "service2").await;
        assert_eq!(
            table.attach_stream(&id, session, tx.clone()).await,
            Err(AttachError::NoTransport(id.clone()))
        );
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Reachable);

        table.attach_transport(&id, session, lazy_transport()).await.unwrap();
        table.attach_stream(&id, session, tx.clone()).await.unwrap();
        assert_eq!(
            table.attach_stream(&id, session, tx).await,
            Err(AttachError::StreamPresent(id.clone()))
        );
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Active);
    }

    #[tokio::test]
    async fn test_attach_refuses_other_session() {
        let table = ConnectionTable::new();
        let (id, old) = reachable(&table, "service2").await;
        table.remove(&id).await;
        let (_, new) = reachable(&table, "service2").await;
        assert_ne!(old, new);

        assert_eq!(
            table.attach_transport(&id, old, lazy_transport()).await,
            Err(AttachError::StaleSession(id.clone()))
        );
        assert_eq!(table.get(&id).await.unwrap().status, PeerStatus::Reachable);
        assert!(table.attach_transport(&id, new, lazy_transport()).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_hands_back_handles() {
        let table = ConnectionTable::new();
        let (id, mut rx) = activate(&table, "service2").await;

        let detached = table.remove(&id).await.unwrap();
        assert!(detached.transport.is_some());
        assert!(detached.stream.is_some());
        assert!(table.get(&id).await.is_none());
        assert!(table.remove(&id).await.is_none());

        assert_eq!(detached.close(), PeerStatus::Active);
        // request stream ended
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_remove_session_ignores_stale_session() {
        let table = ConnectionTable::new();
        let (id, _rx) = activate(&table, "service2").await;
        let old = table.get(&id).await.unwrap().session;

        table.remove(&id).await;
        let (_, new) = reachable(&table, "service2").await;

        assert!(table.remove_session(&id, old).await.is_none());
        assert!(table.get(&id).await.is_some());
        assert!(table.remove_session(&id, new).await.is_some());
        assert!(table.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered_and_detached_from_lock() {
        let table = ConnectionTable::new();
        let (_, _rx3) = activate(&table, "service3").await;
        let (_, _rx1) = activate(&table, "service1").await;
        reachable(&table, "service2").await;

        let snapshot = table.active_snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|p| p.identity.as_str()).collect();
        assert_eq!(ids, vec!["service1", "service3"]);

        // holding the snapshot does not block writers
        table.drain().await;
        assert_eq!(table.len().await, 0);
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stream_never_without_transport_under_contention() {
        let table = ConnectionTable::new();
        let ids: Vec<PeerId> = (1..=4).map(|i| PeerId(format!("service{}", i))).collect();

        let mut writers = Vec::new();
        for id in ids {
            let table = table.clone();
            writers.push(tokio::spawn(async move {
                for round in 0..200 {
                    table
                        .mark_reachable(&id, PeerAddress::new(id.as_str(), 5001))
                        .await;
                    let Some(view) = table.get(&id).await else {
                        continue;
                    };
                    let _ = table.attach_transport(&id, view.session, lazy_transport()).await;
                    let (tx, _rx) = mpsc::channel(1);
                    let _ = table.attach_stream(&id, view.session, tx).await;
                    if round % 3 == 0 {
                        if let Some(detached) = table.remove(&id).await {
                            assert!(detached.stream.is_none() || detached.transport.is_some());
                            detached.close();
                        }
                    }
                }
            }));
        }

        let observer = {
            let table = table.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let records = table.records.read().await;
                    for record in records.values() {
                        let (has_transport, has_stream) = match &record.state {
                            PeerState::Reachable => (false, false),
                            PeerState::Connecting { .. } => (true, false),
                            PeerState::Active { .. } => (true, true),
                        };
                        assert!(!has_stream || has_transport);
                    }
                    drop(records);
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        observer.await.unwrap();
    }
}
