//! The node event loop (components E and F): the single task that owns the
//! `RawNode`, drives ticks and readiness, admits client requests, and
//! applies committed entries to the user state machine.
//!
//! Follows the readiness-cycle shape every `raft-rs` driver uses: collect
//! `Ready`, persist, send messages, apply snapshot, apply committed entries,
//! `advance`, drain the light ready.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use raft::eraftpb::{ConfChange, ConfChangeType, Entry, EntryType, Message, Snapshot};
use raft::{Config as RaftConfig, RawNode, StateRole};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::errors::RaftDriverError;
use crate::id::{decode_u64, encode_u64, AtomicSequence};
use crate::peer::{send_message, PeerRegistry, SenderConfig};
use crate::state_machine::StateMachine;
use crate::storage::LogStore;

/// Requests multiplexed onto the node loop's single inbound queue.
pub enum NodeEvent {
    Propose {
        payload: Vec<u8>,
        reply: oneshot::Sender<ProposeReply>,
    },
    ConfigChange {
        change_type: ConfChangeType,
        node_id: u64,
        context: Vec<u8>,
        reply: oneshot::Sender<ConfigChangeReply>,
    },
    RequestId {
        reply: oneshot::Sender<RequestIdReply>,
    },
    RaftMessage {
        msg: Message,
    },
    ReportUnreachable {
        node_id: u64,
    },
}

#[derive(Debug)]
pub enum ProposeReply {
    Applied(Vec<u8>),
    WrongLeader { leader_id: u64, addr: Option<String> },
    NoLeader,
    Error(String),
}

#[derive(Debug)]
pub enum ConfigChangeReply {
    JoinSuccess {
        assigned_id: u64,
        peer_addrs: HashMap<u64, String>,
    },
    Ok,
    WrongLeader { leader_id: u64, addr: Option<String> },
    NoLeader,
    Error(String),
}

#[derive(Debug)]
pub enum RequestIdReply {
    Reserved(u64),
    WrongLeader { leader_id: u64, addr: Option<String> },
    NoLeader,
}

enum PendingReply {
    Propose(oneshot::Sender<ProposeReply>),
    ConfigChange(oneshot::Sender<ConfigChangeReply>),
}

/// Cheap-to-clone handle used by the mailbox, the gRPC transport service, and
/// the cluster control surface to talk to the node loop without touching its
/// internals.
#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::UnboundedSender<NodeEvent>,
    peers: PeerRegistry,
    own_id: u64,
    proposal_timeout: Duration,
}

impl NodeHandle {
    pub fn own_id(&self) -> u64 {
        self.own_id
    }

    pub fn peers_snapshot(&self) -> HashMap<u64, String> {
        self.peers.snapshot()
    }

    /// Every known peer id, including reserved-but-unpopulated ones as
    /// `None`. Backs the `GET /peers` control surface endpoint.
    pub fn peers_snapshot_all(&self) -> HashMap<u64, Option<String>> {
        self.peers.snapshot_all()
    }

    /// Delivers an inbound Raft protocol message. Fire-and-forget: the loop
    /// processes it on its next turn.
    pub async fn step(&self, msg: Message) -> Result<(), RaftDriverError> {
        self.tx
            .send(NodeEvent::RaftMessage { msg })
            .map_err(|_| RaftDriverError::Transport("node loop is no longer running".into()))
    }

    pub async fn propose_raw(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<ProposeReply, RaftDriverError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::Propose { payload, reply })
            .map_err(|_| RaftDriverError::Transport("node loop is no longer running".into()))?;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| RaftDriverError::ProposalTimeout)?
            .map_err(|_| RaftDriverError::Transport("node loop dropped the reply channel".into()))
    }

    pub async fn config_change_raw(
        &self,
        change_type: ConfChangeType,
        node_id: u64,
        context: Vec<u8>,
        timeout: Duration,
    ) -> Result<ConfigChangeReply, RaftDriverError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::ConfigChange {
                change_type,
                node_id,
                context,
                reply,
            })
            .map_err(|_| RaftDriverError::Transport("node loop is no longer running".into()))?;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| RaftDriverError::ProposalTimeout)?
            .map_err(|_| RaftDriverError::Transport("node loop dropped the reply channel".into()))
    }

    pub async fn request_id_raw(&self, timeout: Duration) -> Result<RequestIdReply, RaftDriverError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::RequestId { reply })
            .map_err(|_| RaftDriverError::Transport("node loop is no longer running".into()))?;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| RaftDriverError::ProposalTimeout)?
            .map_err(|_| RaftDriverError::Transport("node loop dropped the reply channel".into()))
    }

    /// Handles a `reroute_message` RPC relayed from a follower: `kind` is the
    /// wire encoding of [`crate::transport::proto::RerouteKind`] (0 =
    /// propose, 1 = config change, 2 = request id).
    pub async fn handle_reroute(&self, kind: i32, payload: Vec<u8>) -> Result<Vec<u8>, RaftDriverError> {
        match kind {
            0 => match self.propose_raw(payload, self.proposal_timeout).await? {
                ProposeReply::Applied(bytes) => Ok(bytes),
                ProposeReply::WrongLeader { leader_id, addr } => Err(RaftDriverError::NotLeader {
                    leader_hint: addr.map(|a| (leader_id, a)),
                }),
                ProposeReply::NoLeader => Err(RaftDriverError::NoLeader),
                ProposeReply::Error(e) => Err(RaftDriverError::Transport(e)),
            },
            1 => {
                let cc: ConfChange = protobuf::Message::parse_from_bytes(&payload)
                    .map_err(|e| RaftDriverError::Transport(format!("bad conf change payload: {e}")))?;
                match self
                    .config_change_raw(
                        cc.get_change_type(),
                        cc.node_id,
                        cc.context.clone(),
                        self.proposal_timeout,
                    )
                    .await?
                {
                    ConfigChangeReply::JoinSuccess { assigned_id, peer_addrs } => {
                        Ok(serde_json::to_vec(&JoinSuccessPayload { assigned_id, peer_addrs })
                            .unwrap_or_default())
                    }
                    ConfigChangeReply::Ok => Ok(Vec::new()),
                    ConfigChangeReply::WrongLeader { leader_id, addr } => Err(RaftDriverError::NotLeader {
                        leader_hint: addr.map(|a| (leader_id, a)),
                    }),
                    ConfigChangeReply::NoLeader => Err(RaftDriverError::NoLeader),
                    ConfigChangeReply::Error(e) => Err(RaftDriverError::Transport(e)),
                }
            }
            2 => match self.request_id_raw(self.proposal_timeout).await? {
                RequestIdReply::Reserved(id) => Ok(encode_u64(id)),
                RequestIdReply::WrongLeader { leader_id, addr } => Err(RaftDriverError::NotLeader {
                    leader_hint: addr.map(|a| (leader_id, a)),
                }),
                RequestIdReply::NoLeader => Err(RaftDriverError::NoLeader),
            },
            other => Err(RaftDriverError::UnknownRequest(format!(
                "unknown reroute kind {other}"
            ))),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JoinSuccessPayload {
    assigned_id: u64,
    peer_addrs: HashMap<u64, String>,
}

/// Tunables the loop needs beyond what [`RaftConfig`] and [`SenderConfig`]
/// already capture.
#[derive(Clone, Copy, Debug)]
pub struct LoopConfig {
    pub loop_heartbeat: Duration,
    pub snapshot_interval: Duration,
    pub proposal_timeout: Duration,
}

/// Owns the `RawNode` and everything needed to drive it. Not `Clone`; the
/// single task that owns this runs [`NodeLoop::run`] to completion.
pub struct NodeLoop {
    raw_node: RawNode<LogStore>,
    storage: LogStore,
    state_machine: Box<dyn StateMachine>,
    peers: PeerRegistry,
    seq: AtomicSequence,
    client_senders: HashMap<u64, PendingReply>,
    should_quit: bool,
    last_snapshot: Instant,
    loop_cfg: LoopConfig,
    sender_cfg: SenderConfig,
    own_id: u64,
    inbound_rx: mpsc::UnboundedReceiver<NodeEvent>,
    inbound_tx: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeLoop {
    /// Builds the loop and its public handle. `storage` must already be
    /// bootstrapped (single-node leader) or primed via conf change replay
    /// before this is called.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_id: u64,
        raft_cfg: RaftConfig,
        storage: LogStore,
        state_machine: Box<dyn StateMachine>,
        peers: PeerRegistry,
        logger: slog::Logger,
        loop_cfg: LoopConfig,
        sender_cfg: SenderConfig,
    ) -> raft::Result<(Self, NodeHandle)> {
        let raw_node = RawNode::new(&raft_cfg, storage.clone(), &logger)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = NodeHandle {
            tx: tx.clone(),
            peers: peers.clone(),
            own_id,
            proposal_timeout: loop_cfg.proposal_timeout,
        };

        let node_loop = Self {
            raw_node,
            storage,
            state_machine,
            peers,
            seq: AtomicSequence::new(),
            client_senders: HashMap::new(),
            should_quit: false,
            last_snapshot: Instant::now(),
            loop_cfg,
            sender_cfg,
            own_id,
            inbound_rx: rx,
            inbound_tx: tx,
        };

        Ok((node_loop, handle))
    }

    fn is_leader(&self) -> bool {
        self.raw_node.raft.state == StateRole::Leader
    }

    /// The current leader, if known, paired with its address when the peer
    /// registry has one on file.
    fn leader_hint(&self) -> Option<(u64, Option<String>)> {
        let leader = self.raw_node.raft.leader_id;
        if leader == 0 || leader == raft::INVALID_ID {
            return None;
        }
        Some((leader, self.peers.addr_of(leader)))
    }

    fn reserve_next_peer_id(&self) -> u64 {
        let existing = self.peers.ids().into_iter().max().unwrap_or(0);
        existing.max(self.own_id) + 1
    }

    /// Ticks the raft timer and drives one readiness cycle. Exposed
    /// separately from [`Self::run`] so tests can single-step a loop instead
    /// of racing real time.
    pub fn tick_once(&mut self) {
        self.raw_node.tick();
        self.process_ready();
    }

    pub async fn run(mut self) {
        loop {
            if self.should_quit {
                info!(node_id = self.own_id, "node loop shutting down after self-removal");
                break;
            }

            tokio::select! {
                event = self.inbound_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(self.loop_cfg.loop_heartbeat) => {}
            }

            self.tick_once();
        }
    }

    fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Propose { payload, reply } => self.on_propose(payload, reply),
            NodeEvent::ConfigChange {
                change_type,
                node_id,
                context,
                reply,
            } => self.on_config_change(change_type, node_id, context, reply),
            NodeEvent::RequestId { reply } => self.on_request_id(reply),
            NodeEvent::RaftMessage { msg } => {
                if let Err(e) = self.raw_node.step(msg) {
                    debug!(error = %e, "dropping raft message the library rejected");
                }
            }
            NodeEvent::ReportUnreachable { node_id } => {
                self.raw_node.report_unreachable(node_id);
            }
        }
    }

    fn on_propose(&mut self, payload: Vec<u8>, reply: oneshot::Sender<ProposeReply>) {
        if !self.is_leader() {
            let outcome = match self.leader_hint() {
                Some((leader_id, addr)) => ProposeReply::WrongLeader { leader_id, addr },
                None => ProposeReply::NoLeader,
            };
            let _ = reply.send(outcome);
            return;
        }

        let seq = self.seq.increment_and_get();
        match self.raw_node.propose(encode_u64(seq), payload) {
            Ok(()) => {
                self.client_senders.insert(seq, PendingReply::Propose(reply));
            }
            Err(e) => {
                let _ = reply.send(ProposeReply::Error(e.to_string()));
            }
        }
    }

    fn on_config_change(
        &mut self,
        change_type: ConfChangeType,
        node_id: u64,
        context: Vec<u8>,
        reply: oneshot::Sender<ConfigChangeReply>,
    ) {
        if !self.is_leader() {
            let outcome = match self.leader_hint() {
                Some((leader_id, addr)) => ConfigChangeReply::WrongLeader { leader_id, addr },
                None => ConfigChangeReply::NoLeader,
            };
            let _ = reply.send(outcome);
            return;
        }

        // node_id 0 is the "myself" sentinel a node uses when it doesn't
        // know its own assigned id yet; the leader resolves it here.
        let node_id = if node_id == 0 { self.own_id } else { node_id };

        let mut cc = ConfChange::default();
        cc.set_change_type(change_type);
        cc.node_id = node_id;
        cc.context = context;

        let seq = self.seq.increment_and_get();
        match self.raw_node.propose_conf_change(encode_u64(seq), cc) {
            Ok(()) => {
                self.client_senders.insert(seq, PendingReply::ConfigChange(reply));
            }
            Err(e) => {
                let _ = reply.send(ConfigChangeReply::Error(e.to_string()));
            }
        }
    }

    fn on_request_id(&mut self, reply: oneshot::Sender<RequestIdReply>) {
        if !self.is_leader() {
            let outcome = match self.leader_hint() {
                Some((leader_id, addr)) => RequestIdReply::WrongLeader { leader_id, addr },
                None => RequestIdReply::NoLeader,
            };
            let _ = reply.send(outcome);
            return;
        }

        let next_id = self.reserve_next_peer_id();
        self.peers.reserve(next_id);
        let _ = reply.send(RequestIdReply::Reserved(next_id));
    }

    fn process_ready(&mut self) {
        if !self.raw_node.has_ready() {
            return;
        }

        let mut ready = self.raw_node.ready();

        if !ready.messages().is_empty() {
            for msg in ready.take_messages() {
                send_message(self.peers.clone(), self.inbound_tx.clone(), self.sender_cfg, msg);
            }
        }

        if *ready.snapshot() != Snapshot::default() {
            let snap = ready.snapshot().clone();
            self.state_machine.restore(snap.get_data());
            if let Err(e) = self.storage.apply_snapshot(&snap) {
                error!(error = %e, "failed to persist installed snapshot");
            }
        }

        if !ready.committed_entries().is_empty() {
            let entries = ready.take_committed_entries();
            self.apply_committed_entries(entries);
        }

        if !ready.entries().is_empty() {
            if let Err(e) = self.storage.append(ready.entries()) {
                error!(error = %e, "failed to persist appended entries");
            }
        }

        if let Some(hs) = ready.hs() {
            if let Err(e) = self.storage.set_hard_state(hs.clone()) {
                error!(error = %e, "failed to persist hard state");
            }
        }

        if !ready.persisted_messages().is_empty() {
            for msg in ready.take_persisted_messages() {
                send_message(self.peers.clone(), self.inbound_tx.clone(), self.sender_cfg, msg);
            }
        }

        let mut light_rd = self.raw_node.advance(ready);

        if let Some(commit) = light_rd.commit_index() {
            if let Err(e) = self.storage.set_commit_index(commit) {
                error!(error = %e, "failed to persist commit index");
            }
        }

        for msg in light_rd.take_messages() {
            send_message(self.peers.clone(), self.inbound_tx.clone(), self.sender_cfg, msg);
        }

        if !light_rd.committed_entries().is_empty() {
            let entries = light_rd.take_committed_entries();
            self.apply_committed_entries(entries);
        }

        self.raw_node.advance_apply();
    }

    fn apply_committed_entries(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            if entry.data.is_empty() && entry.get_entry_type() == EntryType::EntryNormal {
                continue;
            }
            match entry.get_entry_type() {
                EntryType::EntryNormal => self.apply_normal_entry(&entry),
                EntryType::EntryConfChange => self.apply_conf_change_entry(&entry),
                EntryType::EntryConfChangeV2 => self.apply_conf_change_v2_entry(&entry),
            }
        }
    }

    fn apply_normal_entry(&mut self, entry: &Entry) {
        let result = self.state_machine.apply(&entry.data);
        if let Some(seq) = decode_u64(&entry.context) {
            if let Some(PendingReply::Propose(reply)) = self.client_senders.remove(&seq) {
                let _ = reply.send(ProposeReply::Applied(result));
            }
        }
        self.maybe_snapshot(entry.index);
    }

    fn apply_conf_change_entry(&mut self, entry: &Entry) {
        let cc: ConfChange = match protobuf::Message::parse_from_bytes(&entry.data) {
            Ok(cc) => cc,
            Err(e) => {
                error!(error = %e, "failed to decode committed conf change");
                return;
            }
        };
        let change_type = cc.get_change_type();
        let node_id = cc.node_id;

        match change_type {
            ConfChangeType::AddNode | ConfChangeType::AddLearnerNode => {
                // The local node never appears in its own peer registry,
                // including the join-self case where node_id was rewritten
                // to our own id in on_config_change.
                if node_id != self.own_id {
                    if let Ok(addr) = String::from_utf8(cc.context.clone()) {
                        if !addr.is_empty() {
                            self.peers.insert(node_id, addr);
                        }
                    }
                }
            }
            ConfChangeType::RemoveNode => {
                if node_id == self.own_id {
                    self.should_quit = true;
                } else {
                    self.peers.remove(node_id);
                }
            }
            ConfChangeType::AddLearnerNodeV2 => {}
        }

        let conf_state = self.raw_node.apply_conf_change(&cc).ok();
        if let Some(cs) = conf_state.clone() {
            if let Err(e) = self.storage.set_conf_state(cs.clone()) {
                error!(error = %e, "failed to persist conf state");
            }
            self.snapshot_now(entry.index, cs);
        }

        if let Some(seq) = decode_u64(&entry.context) {
            if let Some(PendingReply::ConfigChange(reply)) = self.client_senders.remove(&seq) {
                let outcome = match change_type {
                    ConfChangeType::AddNode => ConfigChangeReply::JoinSuccess {
                        assigned_id: node_id,
                        peer_addrs: self.peers.snapshot(),
                    },
                    _ => ConfigChangeReply::Ok,
                };
                let _ = reply.send(outcome);
            }
        }
    }

    fn apply_conf_change_v2_entry(&mut self, entry: &Entry) {
        warn!(index = entry.index, "conf change v2 is not supported, ignoring");
        if let Some(seq) = decode_u64(&entry.context) {
            if let Some(pending) = self.client_senders.remove(&seq) {
                let msg = "conf change v2 is not supported".to_string();
                match pending {
                    PendingReply::Propose(reply) => {
                        let _ = reply.send(ProposeReply::Error(msg));
                    }
                    PendingReply::ConfigChange(reply) => {
                        let _ = reply.send(ConfigChangeReply::Error(msg));
                    }
                }
            }
        }
    }

    fn maybe_snapshot(&mut self, last_applied: u64) {
        if self.last_snapshot.elapsed() >= self.loop_cfg.snapshot_interval {
            let conf_state = self.storage.current_conf_state();
            self.snapshot_now(last_applied, conf_state);
        }
    }

    fn snapshot_now(&mut self, index: u64, conf_state: raft::eraftpb::ConfState) {
        let term = self.storage.term_of(index).unwrap_or(0);
        let data = self.state_machine.snapshot();
        if let Err(e) = self.storage.create_snapshot(data, index, term, conf_state) {
            error!(error = %e, "failed to capture snapshot");
            return;
        }
        if let Err(e) = self.storage.compact(index) {
            error!(error = %e, "failed to compact log after snapshot");
        }
        self.last_snapshot = Instant::now();
        debug!(index, "captured snapshot and compacted log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{KvCommand, KvStateMachine};

    fn loop_cfg() -> LoopConfig {
        LoopConfig {
            loop_heartbeat: Duration::from_millis(20),
            snapshot_interval: Duration::from_secs(60),
            proposal_timeout: Duration::from_secs(2),
        }
    }

    fn sender_cfg() -> SenderConfig {
        SenderConfig {
            message_timeout: Duration::from_millis(100),
            message_max_retries: 3,
        }
    }

    fn single_node_loop(id: u64) -> NodeLoop {
        let storage = LogStore::new();
        storage.bootstrap_leader(id).unwrap();
        let raft_cfg = RaftConfig {
            id,
            election_tick: 10,
            heartbeat_tick: 3,
            ..Default::default()
        };
        let (node_loop, _handle) = NodeLoop::new(
            id,
            raft_cfg,
            storage,
            Box::new(KvStateMachine::new()),
            PeerRegistry::new(),
            slog::Logger::root(slog::Discard, slog::o!()),
            loop_cfg(),
            sender_cfg(),
        )
        .unwrap();
        node_loop
    }

    /// Drives `tick_once` until the sole voter elects itself, or panics.
    fn elect_self(node_loop: &mut NodeLoop) {
        for _ in 0..30 {
            node_loop.tick_once();
            if node_loop.is_leader() {
                return;
            }
        }
        panic!("single-node cluster never elected a leader");
    }

    /// Drives `tick_once` until `rx` yields a value, or panics.
    fn drive_until_reply<T>(node_loop: &mut NodeLoop, rx: &mut oneshot::Receiver<T>) -> T {
        for _ in 0..20 {
            node_loop.tick_once();
            if let Ok(v) = rx.try_recv() {
                return v;
            }
        }
        panic!("reply channel never received a response");
    }

    fn set_cmd(key: &str, value: &str) -> Vec<u8> {
        serde_json::to_vec(&KvCommand::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn tick_once_drives_single_node_to_leader() {
        let mut node_loop = single_node_loop(1);
        assert!(!node_loop.is_leader());
        elect_self(&mut node_loop);
        assert!(node_loop.is_leader());
    }

    #[test]
    fn reserve_next_peer_id_is_max_known_id_plus_one() {
        let node_loop = single_node_loop(1);
        assert_eq!(node_loop.reserve_next_peer_id(), 2);
        node_loop.peers.reserve(5);
        assert_eq!(node_loop.reserve_next_peer_id(), 6);
    }

    #[test]
    fn propose_commits_and_applies_through_the_readiness_cycle() {
        let mut node_loop = single_node_loop(1);
        elect_self(&mut node_loop);

        let before_commit = node_loop.storage.commit_index();
        let (reply, mut rx) = oneshot::channel();
        node_loop.on_propose(set_cmd("a", "1"), reply);
        let outcome = drive_until_reply(&mut node_loop, &mut rx);

        match outcome {
            ProposeReply::Applied(result) => assert_eq!(result, b"ok"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(node_loop.storage.commit_index() > before_commit);
    }

    #[test]
    fn on_propose_rejects_when_not_leader() {
        let mut node_loop = single_node_loop(1);
        // Never ticked: no leader has been elected yet.
        let (reply, mut rx) = oneshot::channel();
        node_loop.on_propose(set_cmd("a", "1"), reply);
        match rx.try_recv().unwrap() {
            ProposeReply::NoLeader => {}
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn config_change_add_node_registers_peer_and_replies_join_success() {
        let mut node_loop = single_node_loop(1);
        elect_self(&mut node_loop);

        let (reply, mut rx) = oneshot::channel();
        node_loop.on_config_change(
            ConfChangeType::AddNode,
            2,
            b"127.0.0.1:9002".to_vec(),
            reply,
        );
        let outcome = drive_until_reply(&mut node_loop, &mut rx);

        match outcome {
            ConfigChangeReply::JoinSuccess { assigned_id, peer_addrs } => {
                assert_eq!(assigned_id, 2);
                assert_eq!(peer_addrs.get(&2), Some(&"127.0.0.1:9002".to_string()));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(node_loop.peers.contains(2));
    }

    #[test]
    fn config_change_remove_node_targeting_self_quits_the_loop() {
        let mut node_loop = single_node_loop(1);
        elect_self(&mut node_loop);

        let (reply, mut rx) = oneshot::channel();
        node_loop.on_config_change(
            ConfChangeType::RemoveNode,
            1,
            b"127.0.0.1:9001".to_vec(),
            reply,
        );
        drive_until_reply(&mut node_loop, &mut rx);

        assert!(node_loop.should_quit);
    }

    #[test]
    fn config_change_join_self_sentinel_resolves_to_own_id() {
        let mut node_loop = single_node_loop(1);
        elect_self(&mut node_loop);

        let (reply, mut rx) = oneshot::channel();
        node_loop.on_config_change(ConfChangeType::AddNode, 0, b"127.0.0.1:9001".to_vec(), reply);
        let outcome = drive_until_reply(&mut node_loop, &mut rx);

        match outcome {
            ConfigChangeReply::JoinSuccess { assigned_id, .. } => assert_eq!(assigned_id, 1),
            other => panic!("unexpected reply: {other:?}"),
        }
        // The local node never appears in its own peer registry, even via
        // the join-self sentinel.
        assert!(!node_loop.peers.contains(1));
    }

    #[test]
    fn request_id_on_single_node_cluster_returns_two() {
        let mut node_loop = single_node_loop(1);
        elect_self(&mut node_loop);

        let (reply, rx) = oneshot::channel();
        node_loop.on_request_id(reply);
        match rx.blocking_recv().unwrap() {
            RequestIdReply::Reserved(id) => assert_eq!(id, 2),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
