//! Peer registry and outbound message sender (component C).
//!
//! Bounded timeout and retry count, fire-and-forget: a send that exhausts
//! its retries reports the peer unreachable and moves on rather than
//! blocking the node loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use raft::eraftpb::Message;
use tokio::sync::mpsc::UnboundedSender;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::node::NodeEvent;
use crate::transport::proto::raft_transport_client::RaftTransportClient;
use crate::transport::proto::RaftMessageEnvelope;
use crate::transport::connect_lazy;

/// A peer known to this node. `client` is `None` while the connection is
/// still being established or the peer was only just reserved an id.
#[derive(Clone)]
struct PeerEntry {
    addr: String,
    client: Option<RaftTransportClient<Channel>>,
}

/// Id-indexed registry of cluster peers, read-mostly and shared between the
/// node loop (sole writer) and sender tasks (readers).
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<u64, PeerEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node_id` at `addr`, connecting lazily. Idempotent: calling
    /// this for an already-reserved id just fills in the address.
    pub fn insert(&self, node_id: u64, addr: String) {
        let client = connect_lazy(&addr).ok();
        self.peers
            .write()
            .unwrap()
            .insert(node_id, PeerEntry { addr, client });
    }

    /// Allocates `node_id` with no address yet, ahead of its committed
    /// `AddNode`. A reserved entry has an empty address and no client;
    /// [`Self::insert`] fills both in once the conf change commits.
    pub fn reserve(&self, node_id: u64) {
        self.peers
            .write()
            .unwrap()
            .entry(node_id)
            .or_insert_with(|| PeerEntry {
                addr: String::new(),
                client: None,
            });
    }

    pub fn remove(&self, node_id: u64) {
        self.peers.write().unwrap().remove(&node_id);
    }

    pub fn addr_of(&self, node_id: u64) -> Option<String> {
        self.peers
            .read()
            .unwrap()
            .get(&node_id)
            .map(|p| p.addr.clone())
            .filter(|addr| !addr.is_empty())
    }

    pub fn contains(&self, node_id: u64) -> bool {
        self.peers.read().unwrap().contains_key(&node_id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.peers.read().unwrap().keys().copied().collect()
    }

    /// Snapshot of `node_id -> addr` for already-connected peers. Reserved
    /// ids with no address yet are omitted; see [`Self::snapshot_all`] to
    /// include them.
    pub fn snapshot(&self) -> HashMap<u64, String> {
        self.peers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, p)| !p.addr.is_empty())
            .map(|(id, p)| (*id, p.addr.clone()))
            .collect()
    }

    /// Snapshot of every known id, including reserved-but-unpopulated ones
    /// as `None`. Used by the `GET /peers` control surface endpoint.
    pub fn snapshot_all(&self) -> HashMap<u64, Option<String>> {
        self.peers
            .read()
            .unwrap()
            .iter()
            .map(|(id, p)| (*id, (!p.addr.is_empty()).then(|| p.addr.clone())))
            .collect()
    }

    fn client_for(&self, node_id: u64) -> Option<RaftTransportClient<Channel>> {
        self.peers.read().unwrap().get(&node_id).and_then(|p| p.client.clone())
    }
}

/// Tunables controlling the sender's retry behavior, taken from
/// [`crate::config::NodeConfig`].
#[derive(Clone, Copy, Debug)]
pub struct SenderConfig {
    pub message_timeout: Duration,
    pub message_max_retries: u32,
}

/// Dispatches a single outbound Raft message. Never blocks the event loop:
/// the send happens in a spawned task that only touches the peer registry
/// (read-only) and the inbound queue (to report unreachability).
pub fn send_message(
    registry: PeerRegistry,
    inbound: UnboundedSender<NodeEvent>,
    cfg: SenderConfig,
    msg: Message,
) {
    let to = msg.to;
    let Some(mut client) = registry.client_for(to) else {
        debug!(peer = to, "dropping message to unknown peer");
        return;
    };

    tokio::spawn(async move {
        let mut buf = Vec::new();
        if protobuf::Message::write_to_vec(&msg, &mut buf).is_err() {
            warn!(peer = to, "failed to serialize outbound raft message");
            return;
        }

        for attempt in 0..cfg.message_max_retries {
            let req = tonic::Request::new(RaftMessageEnvelope { message: buf.clone() });
            match tokio::time::timeout(cfg.message_timeout, client.send_raft_message(req)).await {
                Ok(Ok(_)) => return,
                Ok(Err(status)) => {
                    debug!(peer = to, attempt, error = %status, "raft message send failed");
                }
                Err(_) => {
                    debug!(peer = to, attempt, "raft message send timed out");
                }
            }
        }

        warn!(peer = to, "peer unreachable after exhausting retries");
        let _ = inbound.send(NodeEvent::ReportUnreachable { node_id: to });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty() {
        let reg = PeerRegistry::new();
        assert!(reg.ids().is_empty());
        assert!(reg.addr_of(2).is_none());
    }

    #[test]
    fn insert_then_lookup() {
        let reg = PeerRegistry::new();
        reg.insert(2, "127.0.0.1:9002".to_string());
        assert_eq!(reg.addr_of(2), Some("127.0.0.1:9002".to_string()));
        assert!(reg.contains(2));
    }

    #[test]
    fn remove_clears_entry() {
        let reg = PeerRegistry::new();
        reg.insert(2, "127.0.0.1:9002".to_string());
        reg.remove(2);
        assert!(!reg.contains(2));
    }

    #[test]
    fn snapshot_reflects_all_peers() {
        let reg = PeerRegistry::new();
        reg.insert(2, "127.0.0.1:9002".to_string());
        reg.insert(3, "127.0.0.1:9003".to_string());
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&3), Some(&"127.0.0.1:9003".to_string()));
    }

    // Nothing listens on this loopback port, so every attempt fails fast
    // with a connection error rather than actually waiting out the
    // per-attempt timeout.
    #[tokio::test]
    async fn unreachable_peer_reports_within_retry_budget() {
        let reg = PeerRegistry::new();
        reg.insert(9, "127.0.0.1:1".to_string());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cfg = SenderConfig {
            message_timeout: Duration::from_millis(100),
            message_max_retries: 5,
        };
        let mut msg = Message::default();
        msg.to = 9;

        let start = std::time::Instant::now();
        send_message(reg, tx, cfg, msg);

        let event = tokio::time::timeout(Duration::from_millis(600), rx.recv())
            .await
            .expect("ReportUnreachable within the retry budget")
            .unwrap();
        match event {
            NodeEvent::ReportUnreachable { node_id } => assert_eq!(node_id, 9),
            _ => panic!("expected ReportUnreachable"),
        }
        assert!(start.elapsed() <= Duration::from_millis(600));
    }
}
