use crate::types::{Key, KvMap, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Atomic store operations - lowest level instructions that mutate StoreCore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreOp {
    /// Insert or overwrite a single key
    Set { key: Key, value: Value },

    /// Append a pair to the replication outbox
    Enqueue { key: Key, value: Value },

    /// Bulk overwrite: every incoming key wins over the local value
    Merge(KvMap),
}

impl StoreOp {
    /// Keys whose value changes when this op runs
    pub fn touched_keys(&self) -> Vec<&[u8]> {
        match self {
            StoreOp::Set { key, .. } => vec![key.as_slice()],
            StoreOp::Enqueue { .. } => vec![],
            StoreOp::Merge(kvs) => kvs.keys().map(Vec::as_slice).collect(),
        }
    }
}

/// Core store state: the key-value map and the outbox of local writes.
///
/// Both live together because a local write must land in the map and the
/// outbox in one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreCore {
    /// KV storage using BTreeMap for prefix scanning support
    data: BTreeMap<Key, Value>,

    /// Local writes not yet handed to the transport, oldest first
    outbox: VecDeque<(Key, Value)>,
}

impl StoreCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_noop(&self, op: &StoreOp) -> bool {
        match op {
            StoreOp::Set { .. } => false,
            // Every enqueue is a distinct write event, even for a repeated pair
            StoreOp::Enqueue { .. } => false,
            StoreOp::Merge(kvs) => kvs.is_empty(),
        }
    }

    /// Execute a store operation - the only way to mutate StoreCore
    pub fn execute(&mut self, op: StoreOp) {
        match op {
            StoreOp::Set { key, value } => {
                self.data.insert(key, value);
            }
            StoreOp::Enqueue { key, value } => {
                self.outbox.push_back((key, value));
            }
            StoreOp::Merge(kvs) => {
                self.data.extend(kvs);
            }
        }
    }

    pub fn pop_outbox(&mut self) -> Option<(Key, Value)> {
        self.outbox.pop_front()
    }

    pub fn data(&self) -> &BTreeMap<Key, Value> {
        &self.data
    }

    pub fn outbox(&self) -> &VecDeque<(Key, Value)> {
        &self.outbox
    }
}

