use crate::ops::{StoreCore, StoreOp};
use crate::types::{Key, KvMap, PutOrigin, Value};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{watch, Notify};
use tracing::{debug, trace};

enum WatchPattern {
    Exact(Key),
    Prefix(Key),
}

impl WatchPattern {
    fn matches(&self, key: &[u8]) -> bool {
        match self {
            WatchPattern::Exact(watch_key) => watch_key == key,
            WatchPattern::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

struct Watcher {
    pattern: WatchPattern,
    sender: watch::Sender<()>,
}

struct StoreInner {
    core: StoreCore,

    /// Unified watchers for both exact keys and prefixes
    watchers: Vec<Watcher>,

    /// Tracks whether state has unpersisted changes
    dirty: bool,
}

impl StoreInner {
    /// This is the ONLY method that mutates the store - all mutations go through here
    fn execute_ops(&mut self, ops: Vec<StoreOp>) {
        for op in ops {
            if self.core.is_noop(&op) {
                trace!("Skipping noop op: {op:?}");
                continue;
            }
            let changed: Vec<Key> = op.touched_keys().into_iter().map(<[u8]>::to_vec).collect();
            self.core.execute(op);
            for key in &changed {
                self.notify_watchers(key);
            }
            self.dirty = true;
        }
    }

    fn notify_watchers(&mut self, key: &[u8]) {
        self.watchers.retain(|watcher| {
            if watcher.pattern.matches(key) {
                watcher.sender.send(()).is_ok()
            } else {
                true
            }
        });
    }

    fn add_watcher(&mut self, pattern: WatchPattern) -> watch::Receiver<()> {
        let (sender, receiver) = watch::channel(());
        self.watchers.push(Watcher { pattern, sender });
        receiver
    }
}

/// The key-value map together with its replication outbox.
///
/// A single lock covers both so that a local write is never observable in
/// one without the other. Consumers of the outbox park on `outbox_ready`.
pub struct Store {
    inner: RwLock<StoreInner>,
    outbox_ready: Notify,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::from_core(StoreCore::new())
    }

    pub(crate) fn from_core(core: StoreCore) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                core,
                watchers: Vec::new(),
                dirty: false,
            }),
            outbox_ready: Notify::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<StoreInner> {
        self.inner.read().expect("Failed to lock store state")
    }

    fn write(&self) -> RwLockWriteGuard<StoreInner> {
        self.inner.write().expect("Failed to lock store state")
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.read().core.data().get(key).cloned()
    }

    /// Write a key. Local writes are queued for replication in the same
    /// critical section that updates the map.
    pub fn put(&self, origin: PutOrigin, key: Key, value: Value) {
        trace!(?origin, key_len = key.len(), value_len = value.len(), "put");
        let ops = match origin {
            PutOrigin::Local => vec![
                StoreOp::Set {
                    key: key.clone(),
                    value: value.clone(),
                },
                StoreOp::Enqueue { key, value },
            ],
            PutOrigin::Remote => vec![StoreOp::Set { key, value }],
        };
        self.write().execute_ops(ops);
        if origin.is_local() {
            self.outbox_ready.notify_one();
        }
    }

    /// Overwrite every key present in `incoming`; other keys are untouched.
    /// Returns the number of keys written.
    pub fn merge(&self, incoming: KvMap) -> usize {
        let n_keys = incoming.len();
        self.write().execute_ops(vec![StoreOp::Merge(incoming)]);
        debug!(n_keys, "Merged incoming map");
        n_keys
    }

    pub fn local_map(&self) -> KvMap {
        self.read().core.data().clone()
    }

    /// Get items by prefix (for range scans)
    pub fn get_by_prefix(&self, prefix: &[u8]) -> KvMap {
        self.read()
            .core
            .data()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().core.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().core.data().is_empty()
    }

    /// Number of local writes waiting to be replicated
    pub fn pending(&self) -> usize {
        self.read().core.outbox().len()
    }

    /// Pop the oldest queued write without waiting
    pub fn try_next(&self) -> Option<(Key, Value)> {
        let mut inner = self.write();
        let item = inner.core.pop_outbox()?;
        inner.dirty = true;
        Some(item)
    }

    /// Pop the oldest queued write, waiting for a local put if the outbox is empty
    pub async fn next(&self) -> (Key, Value) {
        loop {
            // Created before the check so a put landing in between leaves a permit
            let notified = self.outbox_ready.notified();
            if let Some(item) = self.try_next() {
                debug!(key_len = item.0.len(), "Dequeued write for replication");
                return item;
            }
            notified.await;
        }
    }

    pub fn watch_key(&self, key: &[u8]) -> watch::Receiver<()> {
        self.write().add_watcher(WatchPattern::Exact(key.to_vec()))
    }

    pub fn watch_prefix(&self, prefix: &[u8]) -> watch::Receiver<()> {
        self.write().add_watcher(WatchPattern::Prefix(prefix.to_vec()))
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    /// Clone the core for persisting and clear the dirty marker in one step
    pub(crate) fn take_snapshot(&self) -> StoreCore {
        let mut inner = self.write();
        inner.dirty = false;
        inner.core.clone()
    }

    pub(crate) fn mark_dirty(&self) {
        self.write().dirty = true;
    }
}
