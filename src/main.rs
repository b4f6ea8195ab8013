use raft::Config as RaftConfig;

use raft_runtime::config::NodeConfig;
use raft_runtime::node::{LoopConfig, NodeLoop};
use raft_runtime::peer::{PeerRegistry, SenderConfig};
use raft_runtime::state_machine::KvStateMachine;
use raft_runtime::storage::LogStore;
use raft_runtime::{cluster, logging, transport, Mailbox};

#[tokio::main]
async fn main() {
    logging::init_tracing();

    let config = match NodeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    }
    config.print_summary();

    let peers = PeerRegistry::new();
    for (&id, addr) in &config.cluster_nodes {
        peers.insert(id, addr.clone());
    }

    let storage = LogStore::new();
    if config.cluster_nodes.is_empty() {
        // No known peers at startup: bootstrap as the sole voter. Any later
        // join arrives as an ordinary committed AddNode.
        storage
            .bootstrap_leader(config.node_id)
            .expect("bootstrapping the initial snapshot cannot fail");
    }

    let raft_cfg = RaftConfig {
        id: config.node_id,
        election_tick: config.election_tick,
        heartbeat_tick: config.heartbeat_tick,
        ..Default::default()
    };
    if let Err(e) = raft_cfg.validate() {
        eprintln!("invalid raft configuration: {e}");
        std::process::exit(1);
    }

    let state_machine = Box::new(KvStateMachine::new());

    let loop_cfg = LoopConfig {
        loop_heartbeat: config.loop_heartbeat,
        snapshot_interval: config.snapshot_interval,
        proposal_timeout: config.proposal_timeout,
    };
    let sender_cfg = SenderConfig {
        message_timeout: config.message_timeout,
        message_max_retries: config.message_max_retries,
    };

    let (node_loop, node_handle) = NodeLoop::new(
        config.node_id,
        raft_cfg,
        storage,
        state_machine,
        peers,
        logging::raft_logger(),
        loop_cfg,
        sender_cfg,
    )
    .expect("failed to construct raft node");

    tokio::spawn(node_loop.run());
    tokio::spawn(transport::start_transport_server(config.bind_addr.clone(), node_handle.clone()));

    let mailbox = Mailbox::new(node_handle, config.proposal_timeout);
    let cluster_handle = cluster::ClusterHandle::new(mailbox);
    cluster::start_control_server(config.control_addr.clone(), cluster_handle).await;
}
