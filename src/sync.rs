use crate::node::State;
use crate::types::{Key, KvMap, PeerId, PutOrigin, Value};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PEER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Messages exchanged between replicators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// A local write on `from`, to be applied as a remote write
    Put { from: PeerId, key: Key, value: Value },
    /// Ask a peer for its whole map during bootstrap
    MapRequest { from: PeerId },
    /// Answer to `MapRequest`
    MapResponse { from: PeerId, kvs: KvMap },
}

impl Message {
    pub fn sender(&self) -> PeerId {
        match self {
            Message::Put { from, .. }
            | Message::MapRequest { from }
            | Message::MapResponse { from, .. } => *from,
        }
    }
}

/// Delivery of a message to one peer. Retries, if any, are up to the implementation.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, peer: &PeerId, msg: Message) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Identity stamped on outgoing messages
    pub local_id: PeerId,
    /// How long bootstrap waits for peers to show up, and then for a map response
    pub bootstrap_timeout: Duration,
    /// How often bootstrap re-checks the peer set while waiting
    pub peer_poll_interval: Duration,
}

impl ReplicatorConfig {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
            peer_poll_interval: DEFAULT_PEER_POLL_INTERVAL,
        }
    }

    pub fn bootstrap_timeout(mut self, bootstrap_timeout: Duration) -> Self {
        self.bootstrap_timeout = bootstrap_timeout;
        self
    }

    pub fn peer_poll_interval(mut self, peer_poll_interval: Duration) -> Self {
        self.peer_poll_interval = peer_poll_interval;
        self
    }
}

/// How a bootstrap attempt concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    AlreadyBootstrapped,
    /// No peer appeared before the timeout
    NoPeers,
    /// A peer's map was merged
    Synced,
    /// Peers were asked but none answered in time
    TimedOut,
}

/// Drives a node's state from the outside: drains the outbox to peers,
/// applies inbound messages and runs bootstrap.
pub struct Replicator<T: Transport> {
    state: Arc<State>,
    transport: Arc<T>,
    config: ReplicatorConfig,
}

impl<T: Transport> Replicator<T> {
    pub fn new(state: Arc<State>, transport: Arc<T>, config: ReplicatorConfig) -> Self {
        Self {
            state,
            transport,
            config,
        }
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn local_id(&self) -> PeerId {
        self.config.local_id
    }

    /// Start the replication sender loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.replicate_next().await;
            }
        })
    }

    /// Wait for the next queued local write and send it to every current peer.
    ///
    /// Returns how many peers accepted it. Failed sends are logged and dropped.
    pub async fn replicate_next(&self) -> usize {
        let (key, value) = self.state.get_next_kv().await;
        self.broadcast(key, value).await
    }

    #[tracing::instrument(skip_all, fields(node = %self.config.local_id, key_len = key.len()))]
    async fn broadcast(&self, key: Key, value: Value) -> usize {
        let peers = self.state.get_peers();
        let mut reached = 0;
        for peer in &peers {
            let msg = Message::Put {
                from: self.config.local_id,
                key: key.clone(),
                value: value.clone(),
            };
            match self.transport.send(peer, msg).await {
                Ok(()) => reached += 1,
                Err(e) => warn!("Failed to replicate write to peer {peer}: {e:#}"),
            }
        }
        debug!("Replicated write to {reached}/{} peers", peers.len());
        reached
    }

    /// Apply a message received from a peer
    #[tracing::instrument(skip_all, fields(node = %self.config.local_id, from = %msg.sender()))]
    pub async fn handle_message(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Put { key, value, .. } => {
                self.state.put(PutOrigin::Remote, key, value);
            }
            Message::MapRequest { from } => {
                let kvs = self.state.local_map();
                info!("Returning map ({} keys) to node {from}", kvs.len());
                let response = Message::MapResponse {
                    from: self.config.local_id,
                    kvs,
                };
                self.transport
                    .send(&from, response)
                    .await
                    .with_context(|| format!("Failed to answer map request from {from}"))?;
            }
            Message::MapResponse { from, kvs } => {
                // Only the first answer seeds the store; later ones would
                // overwrite writes made since bootstrap
                if self.state.is_bootstrapped() {
                    info!(
                        "Already bootstrapped, dropping map ({} keys) from node {from}",
                        kvs.len()
                    );
                    return Ok(());
                }
                info!("Merging map ({} keys) from node {from}", kvs.len());
                self.state.merge_kvs(kvs);
                self.state.mark_bootstrapped();
            }
        }
        Ok(())
    }

    /// Bootstrap: wait for peers, then pull a full map from them.
    ///
    /// With no peers before the timeout the node starts from its own state.
    /// If peers exist but none answers in time, the node proceeds anyway.
    #[tracing::instrument(skip(self), fields(node = %self.config.local_id))]
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        if self.state.is_bootstrapped() {
            return BootstrapOutcome::AlreadyBootstrapped;
        }

        let deadline = Instant::now() + self.config.bootstrap_timeout;
        let peers = loop {
            let peers = self.state.get_peers();
            if !peers.is_empty() {
                break peers;
            }
            if Instant::now() >= deadline {
                info!("No peers to bootstrap from, starting fresh");
                self.state.mark_bootstrapped();
                return BootstrapOutcome::NoPeers;
            }
            sleep(self.config.peer_poll_interval).await;
        };

        info!("Bootstrapping from {} peers...", peers.len());
        let mut requested = 0;
        for peer in &peers {
            let request = Message::MapRequest {
                from: self.config.local_id,
            };
            match self.transport.send(peer, request).await {
                Ok(()) => requested += 1,
                Err(e) => warn!("Failed to request map from peer {peer}: {e:#}"),
            }
        }

        if requested == 0 {
            warn!("Bootstrap: Failed to reach any peer, proceeding anyway");
        } else if timeout(self.config.bootstrap_timeout, self.state.wait_bootstrapped())
            .await
            .is_ok()
        {
            info!("Bootstrap: Synced from peers, {} keys", self.state.status().n_kvs);
            return BootstrapOutcome::Synced;
        } else {
            warn!(
                "Bootstrap: No map response within {:?}, proceeding anyway",
                self.config.bootstrap_timeout
            );
        }

        self.state.mark_bootstrapped();
        BootstrapOutcome::TimedOut
    }
}
