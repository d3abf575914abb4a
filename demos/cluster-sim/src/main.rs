use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, RwLock},
};
use tidekv::{
    sync::{BootstrapOutcome, Message, Replicator, ReplicatorConfig, Transport},
    PeerId, PutOrigin, State,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, timeout, Duration},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const BASE_PORT: u16 = 7000;

#[derive(Parser, Debug)]
#[command(name = "cluster-sim")]
#[command(about = "Run several TideKV nodes in one process and check they converge", long_about = None)]
struct Cli {
    /// Number of nodes in the cluster
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=1000))]
    nodes: u16,

    /// Local writes issued by every node
    #[arg(short, long, default_value_t = 10)]
    writes: usize,

    /// Bootstrap timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    bootstrap_timeout_ms: u64,

    /// How long to wait for convergence, in seconds
    #[arg(long, default_value_t = 10)]
    converge_secs: u64,

    /// Write a snapshot per node into this directory at the end
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

/// In-process network: every node gets an unbounded inbox
#[derive(Default)]
struct ChannelNetwork {
    inboxes: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Message>>>,
}

impl Transport for ChannelNetwork {
    async fn send(&self, peer: &PeerId, msg: Message) -> Result<()> {
        let inboxes = self
            .inboxes
            .read()
            .map_err(|_| anyhow!("network table poisoned"))?;
        let inbox = inboxes
            .get(peer)
            .ok_or_else(|| anyhow!("Peer {peer} address not found"))?;
        inbox
            .send(msg)
            .map_err(|_| anyhow!("Peer {peer} inbox closed"))
    }
}

struct SimNode {
    id: PeerId,
    replicator: Arc<Replicator<ChannelNetwork>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SimNode {
    fn state(&self) -> &Arc<State> {
        self.replicator.state()
    }
}

fn node_id(index: u16) -> PeerId {
    PeerId::new(SocketAddr::from(([127, 0, 0, 1], BASE_PORT + index)), 1)
}

/// Wait until every node holds the same map with at least `expected` keys
async fn wait_converged(nodes: &[SimNode], expected: usize) {
    loop {
        let reference = nodes[0].state().local_map();
        if reference.len() >= expected
            && nodes.iter().all(|node| node.state().local_map() == reference)
        {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn join_node(
    id: PeerId,
    network: &Arc<ChannelNetwork>,
    config: ReplicatorConfig,
    snapshot_dir: Option<&PathBuf>,
) -> Result<SimNode> {
    let state = match snapshot_dir {
        Some(dir) => State::with_snapshot(dir.join(format!("node_{}.snapshot", id.addr.port())))?,
        None => State::new(),
    };
    let replicator = Arc::new(Replicator::new(Arc::new(state), network.clone(), config));

    let (tx, mut rx) = mpsc::unbounded_channel();
    network
        .inboxes
        .write()
        .map_err(|_| anyhow!("network table poisoned"))?
        .insert(id, tx);

    // Inbound handler: peer messages -> state
    let inbound = tokio::spawn({
        let replicator = replicator.clone();
        async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = replicator.handle_message(msg).await {
                    error!("Error handling message on {id}: {e:#}");
                }
            }
        }
    });

    Ok(SimNode {
        id,
        replicator,
        tasks: vec![inbound],
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let converge_timeout = Duration::from_secs(cli.converge_secs);

    let network = Arc::new(ChannelNetwork::default());
    let mut nodes: Vec<SimNode> = Vec::new();

    for index in 0..cli.nodes {
        // A joining node merges only the first map it gets back, so let the
        // existing nodes settle before it asks
        let settled = usize::from(index) * cli.writes;
        if !nodes.is_empty()
            && timeout(converge_timeout, wait_converged(&nodes, settled))
                .await
                .is_err()
        {
            bail!("nodes did not converge before node {index} joined");
        }

        let id = node_id(index);
        let config = ReplicatorConfig::new(id)
            .bootstrap_timeout(Duration::from_millis(cli.bootstrap_timeout_ms));
        let mut node = join_node(id, &network, config, cli.snapshot_dir.as_ref())?;

        // Discovery: everyone learns about everyone
        for existing in &nodes {
            existing.state().add_peer(id);
            node.state().add_peer(existing.id);
        }

        let outcome = node.replicator.bootstrap().await;
        info!(
            "Node {id} bootstrapped ({outcome:?}) with {} keys",
            node.state().status().n_kvs
        );
        if index > 0 && outcome != BootstrapOutcome::Synced {
            error!("Node {id} did not sync from its peers");
        }

        node.tasks.push(node.replicator.clone().start());

        // Local writes from this node
        for i in 0..cli.writes {
            node.state().put(
                PutOrigin::Local,
                format!("node{index}/key{i}"),
                format!("value{i} from {id}"),
            );
        }
        nodes.push(node);
    }

    let expected = usize::from(cli.nodes) * cli.writes;
    let converged = timeout(converge_timeout, wait_converged(&nodes, expected))
        .await
        .is_ok();

    for node in &nodes {
        let status = node.state().status();
        println!("{}", serde_json::to_string_pretty(&status)?);
        if cli.snapshot_dir.is_some() {
            node.state().persist()?;
        }
    }

    for node in &nodes {
        for task in &node.tasks {
            task.abort();
        }
    }

    if converged {
        println!("\n✅ All {} nodes converged on {expected} keys", cli.nodes);
        Ok(())
    } else {
        println!("\n❌ Nodes did not converge");
        bail!("cluster did not converge within {}s", cli.converge_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_count_is_bounded() {
        assert!(Cli::try_parse_from(["cluster-sim", "--nodes", "0"]).is_err());
        assert!(Cli::try_parse_from(["cluster-sim", "--nodes", "1001"]).is_err());

        let cli = Cli::try_parse_from(["cluster-sim", "--nodes", "1000"]).unwrap();
        assert_eq!(cli.nodes, 1000);
        assert_eq!(node_id(cli.nodes - 1).addr.port(), BASE_PORT + 999);
    }
}
