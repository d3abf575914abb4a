use crate::types::PeerId;
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Currently known peers, guarded independently of the store
#[derive(Default)]
pub struct PeerSet {
    peers: RwLock<HashSet<PeerId>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<HashSet<PeerId>> {
        self.peers.read().expect("Failed to lock peer set")
    }

    fn write(&self) -> RwLockWriteGuard<HashSet<PeerId>> {
        self.peers.write().expect("Failed to lock peer set")
    }

    /// Copy of the current membership; later changes do not affect it
    pub fn snapshot(&self) -> HashSet<PeerId> {
        self.read().clone()
    }

    /// Add a peer. Returns false if it was already known.
    pub fn add(&self, peer: PeerId) -> bool {
        let added = self.write().insert(peer);
        if added {
            info!(%peer, "Added peer node");
        }
        added
    }

    /// Remove a peer. Returns false if it was not known.
    pub fn remove(&self, peer: &PeerId) -> bool {
        let removed = self.write().remove(peer);
        if removed {
            info!(%peer, "Removed peer node");
        }
        removed
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.read().contains(peer)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
