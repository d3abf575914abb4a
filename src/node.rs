use crate::bootstrap::BootstrapFlag;
use crate::peers::PeerSet;
use crate::snapshot;
use crate::store::Store;
use crate::types::{Key, KvMap, PeerId, PutOrigin, Value};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub n_kvs: usize,
    pub pending: usize,
    pub peers: Vec<PeerId>,
    pub bootstrapped: bool,
    pub dirty: bool,
    pub snapshot: Option<PathBuf>,
}

/// Per-node state shared by discovery, the inbound handler and the
/// replication sender.
///
/// - Peer set, store (with its outbox) and bootstrap flag are locked independently
/// - Local writes land in the store and the outbox atomically
/// - Remote writes and merges never reach the outbox
/// - BTreeMap for prefix scanning capability
///
/// Share it between tasks as `Arc<State>`.
pub struct State {
    peers: PeerSet,
    store: Store,
    bootstrapped: BootstrapFlag,

    /// Optional snapshot path for store persistence
    snapshot_path: Option<PathBuf>,

    /// Serializes snapshot writers; they share one temp file
    persist_lock: Mutex<()>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Empty peers, empty store, empty outbox, not bootstrapped
    pub fn new() -> Self {
        Self {
            peers: PeerSet::new(),
            store: Store::new(),
            bootstrapped: BootstrapFlag::new(),
            snapshot_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a state with persistence enabled, restoring the store and
    /// outbox from `path` when a snapshot exists.
    ///
    /// Peers and the bootstrap flag always start fresh.
    pub fn with_snapshot<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let store = match snapshot::read_snapshot(&path)? {
            Some(core) => Store::from_core(core),
            None => {
                info!("No snapshot at {}, starting empty", path.display());
                Store::new()
            }
        };
        Ok(Self {
            peers: PeerSet::new(),
            store,
            bootstrapped: BootstrapFlag::new(),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn get_peers(&self) -> HashSet<PeerId> {
        self.peers.snapshot()
    }

    /// Add a peer node (dynamic membership)
    pub fn add_peer(&self, peer: PeerId) -> bool {
        self.peers.add(peer)
    }

    /// Remove a peer node (dynamic membership)
    pub fn remove_peer(&self, peer: &PeerId) -> bool {
        self.peers.remove(peer)
    }

    pub fn contains_peer(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.store.get(key)
    }

    pub fn put(&self, origin: PutOrigin, key: impl Into<Key>, value: impl Into<Value>) {
        self.store.put(origin, key.into(), value.into());
    }

    /// Bulk merge of a peer's map; incoming values win on every shared key
    pub fn merge_kvs(&self, incoming: KvMap) {
        self.store.merge(incoming);
    }

    pub fn local_map(&self) -> KvMap {
        self.store.local_map()
    }

    pub fn get_by_prefix(&self, prefix: &[u8]) -> KvMap {
        self.store.get_by_prefix(prefix)
    }

    /// Oldest unsent local write; waits for one if the outbox is empty
    pub async fn get_next_kv(&self) -> (Key, Value) {
        self.store.next().await
    }

    pub fn try_next_kv(&self) -> Option<(Key, Value)> {
        self.store.try_next()
    }

    pub fn pending(&self) -> usize {
        self.store.pending()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.is_set()
    }

    /// Returns true if this call performed the transition
    pub fn mark_bootstrapped(&self) -> bool {
        self.bootstrapped.mark()
    }

    pub async fn wait_bootstrapped(&self) {
        self.bootstrapped.wait().await
    }

    /// Watch a specific key for changes. Receiver notifies on any change to the key.
    pub fn watch(&self, key: &[u8]) -> watch::Receiver<()> {
        self.store.watch_key(key)
    }

    /// Watch keys sharing a prefix. Receiver notifies on any change to matching keys.
    pub fn watch_prefix(&self, prefix: &[u8]) -> watch::Receiver<()> {
        self.store.watch_prefix(prefix)
    }

    fn snapshot_path(&self) -> Result<&Path> {
        self.snapshot_path
            .as_deref()
            .ok_or_else(|| anyhow!("Snapshot path not configured"))
    }

    /// Persist store and outbox to the snapshot path
    pub fn persist(&self) -> Result<()> {
        let path = self.snapshot_path()?;
        let _guard = self.persist_lock.lock().expect("Failed to lock snapshot writer");
        self.persist_locked(path)
    }

    pub fn persist_if_dirty(&self) -> Result<bool> {
        let path = self.snapshot_path()?;
        let _guard = self.persist_lock.lock().expect("Failed to lock snapshot writer");
        if !self.store.is_dirty() {
            return Ok(false);
        }
        self.persist_locked(path)?;
        Ok(true)
    }

    /// Caller holds `persist_lock`; the store lock is only held while cloning
    fn persist_locked(&self, path: &Path) -> Result<()> {
        let core = self.store.take_snapshot();
        if let Err(err) = snapshot::write_snapshot(path, &core) {
            self.store.mark_dirty();
            return Err(err);
        }
        Ok(())
    }

    /// Get node status (for debugging/monitoring)
    pub fn status(&self) -> NodeStatus {
        let mut peers: Vec<PeerId> = self.get_peers().into_iter().collect();
        peers.sort();
        NodeStatus {
            n_kvs: self.store.len(),
            pending: self.store.pending(),
            peers,
            bootstrapped: self.is_bootstrapped(),
            dirty: self.store.is_dirty(),
            snapshot: self.snapshot_path.clone(),
        }
    }
}
