use crate::types::{PeerAddress, PeerId};
use std::collections::HashMap;

/// The fixed universe of sibling nodes and how to reach them.
///
/// Candidates are `<prefix>1 ..= <prefix>N` without the local node. An
/// address is `<id>:<discovery_port>` unless an explicit override exists.
#[derive(Clone, Debug)]
pub struct PeerDirectory {
    local: PeerId,
    candidates: Vec<PeerId>,
    discovery_port: u16,
    overrides: HashMap<PeerId, PeerAddress>,
}

impl PeerDirectory {
    pub fn new(
        local: PeerId,
        prefix: &str,
        cluster_size: u16,
        discovery_port: u16,
        overrides: impl IntoIterator<Item = (PeerId, PeerAddress)>,
    ) -> Self {
        let candidates = (1..=cluster_size)
            .map(|i| PeerId(format!("{}{}", prefix, i)))
            .filter(|id| *id != local)
            .collect();

        Self {
            local,
            candidates,
            discovery_port,
            overrides: overrides.into_iter().collect(),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn candidates(&self) -> &[PeerId] {
        &self.candidates
    }

    pub fn resolve(&self, id: &PeerId) -> PeerAddress {
        self.overrides
            .get(id)
            .cloned()
            .unwrap_or_else(|| PeerAddress::new(id.as_str(), self.discovery_port))
    }
}
