use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Keys are opaque byte strings, compared byte-for-byte
pub type Key = Vec<u8>;

/// Values are opaque byte strings
pub type Value = Vec<u8>;

/// Whole-map form used by bootstrap transfers and snapshots
pub type KvMap = BTreeMap<Key, Value>;

/// Identity of a remote node.
///
/// An address alone is not enough: a process restarted at the same address
/// starts with a fresh state and must be treated as a different peer, so the
/// incarnation is part of the identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    pub addr: SocketAddr,
    pub incarnation: u64,
}

impl PeerId {
    pub fn new(addr: SocketAddr, incarnation: u64) -> Self {
        Self { addr, incarnation }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.addr, self.incarnation)
    }
}

/// Where a write came from, which decides whether it is propagated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PutOrigin {
    /// Written by this node; queued for replication
    Local,
    /// Received from a peer; already propagated, never re-sent
    Remote,
}

impl PutOrigin {
    pub fn is_local(self) -> bool {
        matches!(self, PutOrigin::Local)
    }
}
