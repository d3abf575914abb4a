//! TideKV - the per-node state core of an eventually consistent, peer-to-peer key-value store
//!
//! Every node owns one [`State`]: the peers it knows about, its key-value map,
//! an outbox of local writes waiting to be replicated, and a one-shot
//! "bootstrapped" flag. Peer discovery, the inbound message handler and the
//! replication sender all work on the same `State` concurrently.
//!
//! # Key Features
//!
//! - **Independent cells**: peers, store and bootstrap flag are locked separately
//! - **Atomic local writes**: a local put updates the map and queues the write in one step
//! - **No re-broadcast**: remote writes and bootstrap merges are never queued
//! - **Blocking dequeue**: the replication sender parks until a local write arrives
//! - **Transport-agnostic**: [`sync::Replicator`] drives replication over any [`sync::Transport`]
//! - **Optional snapshots**: store and outbox can be persisted and restored
//!
//! # Quick Start
//!
//! ```rust
//! use tidekv::{PutOrigin, State};
//!
//! let state = State::new();
//! state.put(PutOrigin::Local, b"key".to_vec(), b"value".to_vec());
//! assert_eq!(state.get(b"key").as_deref(), Some(&b"value"[..]));
//! assert_eq!(state.try_next_kv(), Some((b"key".to_vec(), b"value".to_vec())));
//! ```
//!
//! # Non-goals
//!
//! TideKV intentionally does NOT provide:
//! - Gossip dissemination order or anti-entropy repair
//! - Vector clocks or CRDT merges: the map handed to a merge simply wins
//! - Network transport or peer discovery

pub mod bootstrap;
pub mod node;
pub mod ops;
pub mod peers;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod types;

pub use node::{NodeStatus, State};
pub use types::{Key, KvMap, PeerId, PutOrigin, Value};
