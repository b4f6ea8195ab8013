//! Client façade for submitting proposals and membership changes
//! (component D).
//!
//! Tries the local node first; on `WrongLeader` relays once to the named
//! leader over the peer transport. A second `WrongLeader` from that relay
//! means leadership moved again mid-redirect, surfaced as
//! `LeadershipUnstable` rather than chased indefinitely.

use std::time::Duration;

use raft::eraftpb::ConfChangeType;
use tonic::Request;

use crate::errors::RaftDriverError;
use crate::id::decode_u64;
use crate::node::{ConfigChangeReply, NodeHandle, ProposeReply, RequestIdReply};
use crate::transport::connect_lazy;
use crate::transport::proto::{RerouteKind, RerouteRequest};

/// Successful outcome of a membership change submitted through the mailbox.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub assigned_id: u64,
    pub peer_addrs: std::collections::HashMap<u64, String>,
}

#[derive(Clone)]
pub struct Mailbox {
    node: NodeHandle,
    proposal_timeout: Duration,
}

impl Mailbox {
    pub fn new(node: NodeHandle, proposal_timeout: Duration) -> Self {
        Self { node, proposal_timeout }
    }

    /// Every known peer id, including reserved-but-unpopulated ones as
    /// `None`.
    pub fn peers_snapshot_all(&self) -> std::collections::HashMap<u64, Option<String>> {
        self.node.peers_snapshot_all()
    }

    /// Submits an opaque proposal, returning the state machine's applied
    /// result.
    pub async fn send(&self, payload: Vec<u8>) -> Result<Vec<u8>, RaftDriverError> {
        match self.node.propose_raw(payload.clone(), self.proposal_timeout).await? {
            ProposeReply::Applied(result) => Ok(result),
            ProposeReply::WrongLeader { leader_id, addr } => {
                self.redirect_propose(leader_id, addr, payload).await
            }
            ProposeReply::NoLeader => Err(RaftDriverError::NoLeader),
            ProposeReply::Error(msg) => Err(RaftDriverError::Transport(msg)),
        }
    }

    /// Asks the leader to reserve a fresh node id for a node that wants to
    /// join but doesn't have one yet.
    pub async fn request_id(&self) -> Result<u64, RaftDriverError> {
        match self.node.request_id_raw(self.proposal_timeout).await? {
            RequestIdReply::Reserved(id) => Ok(id),
            RequestIdReply::WrongLeader { leader_id, addr } => {
                self.redirect_request_id(leader_id, addr).await
            }
            RequestIdReply::NoLeader => Err(RaftDriverError::NoLeader),
        }
    }

    /// Requests that `node_id` (at `addr`) join the cluster as a voter.
    pub async fn join(&self, node_id: u64, addr: String) -> Result<JoinOutcome, RaftDriverError> {
        self.config_change(ConfChangeType::AddNode, node_id, addr.into_bytes())
            .await
    }

    /// Requests that `node_id` leave the cluster.
    pub async fn leave(&self, node_id: u64, addr: String) -> Result<(), RaftDriverError> {
        self.config_change(ConfChangeType::RemoveNode, node_id, addr.into_bytes())
            .await
            .map(|_| ())
    }

    async fn config_change(
        &self,
        change_type: ConfChangeType,
        node_id: u64,
        context: Vec<u8>,
    ) -> Result<JoinOutcome, RaftDriverError> {
        match self
            .node
            .config_change_raw(change_type, node_id, context.clone(), self.proposal_timeout)
            .await?
        {
            ConfigChangeReply::JoinSuccess { assigned_id, peer_addrs } => {
                Ok(JoinOutcome { assigned_id, peer_addrs })
            }
            ConfigChangeReply::Ok => Ok(JoinOutcome {
                assigned_id: node_id,
                peer_addrs: self.node.peers_snapshot(),
            }),
            ConfigChangeReply::WrongLeader { leader_id, addr } => {
                self.redirect_config_change(leader_id, addr, change_type, node_id, context)
                    .await
            }
            ConfigChangeReply::NoLeader => Err(RaftDriverError::NoLeader),
            ConfigChangeReply::Error(msg) => Err(RaftDriverError::Transport(msg)),
        }
    }

    async fn redirect_propose(
        &self,
        leader_id: u64,
        addr: Option<String>,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, RaftDriverError> {
        let addr = addr.ok_or(RaftDriverError::NotLeader {
            leader_hint: Some((leader_id, String::new())),
        })?;

        let mut client = connect_lazy(&addr)?;
        let req = Request::new(RerouteRequest {
            kind: RerouteKind::Propose as i32,
            payload,
        });
        let resp = client
            .reroute_message(req)
            .await
            .map_err(|s| RaftDriverError::Transport(s.to_string()))?
            .into_inner();

        if resp.success {
            Ok(resp.result)
        } else {
            // The relay target is no longer the leader either: chasing
            // further would risk an unbounded redirect chain.
            Err(RaftDriverError::LeadershipUnstable)
        }
    }

    async fn redirect_request_id(
        &self,
        leader_id: u64,
        addr: Option<String>,
    ) -> Result<u64, RaftDriverError> {
        let addr = addr.ok_or(RaftDriverError::NotLeader {
            leader_hint: Some((leader_id, String::new())),
        })?;

        let mut client = connect_lazy(&addr)?;
        let req = Request::new(RerouteRequest {
            kind: RerouteKind::RequestId as i32,
            payload: Vec::new(),
        });
        let resp = client
            .reroute_message(req)
            .await
            .map_err(|s| RaftDriverError::Transport(s.to_string()))?
            .into_inner();

        if !resp.success {
            return Err(RaftDriverError::LeadershipUnstable);
        }

        decode_u64(&resp.result)
            .ok_or_else(|| RaftDriverError::Transport("malformed request_id response".into()))
    }

    async fn redirect_config_change(
        &self,
        leader_id: u64,
        addr: Option<String>,
        change_type: ConfChangeType,
        node_id: u64,
        context: Vec<u8>,
    ) -> Result<JoinOutcome, RaftDriverError> {
        let addr = addr.ok_or(RaftDriverError::NotLeader {
            leader_hint: Some((leader_id, String::new())),
        })?;

        let mut cc = raft::eraftpb::ConfChange::default();
        cc.set_change_type(change_type);
        cc.node_id = node_id;
        cc.context = context;
        let mut payload = Vec::new();
        protobuf::Message::write_to_vec(&cc, &mut payload)
            .map_err(|e| RaftDriverError::Transport(format!("failed to encode conf change: {e}")))?;

        let mut client = connect_lazy(&addr)?;
        let req = Request::new(RerouteRequest {
            kind: RerouteKind::ConfigChange as i32,
            payload,
        });
        let resp = client
            .reroute_message(req)
            .await
            .map_err(|s| RaftDriverError::Transport(s.to_string()))?
            .into_inner();

        if !resp.success {
            return Err(RaftDriverError::LeadershipUnstable);
        }

        if resp.result.is_empty() {
            return Ok(JoinOutcome {
                assigned_id: node_id,
                peer_addrs: self.node.peers_snapshot(),
            });
        }

        #[derive(serde::Deserialize)]
        struct JoinSuccessPayload {
            assigned_id: u64,
            peer_addrs: std::collections::HashMap<u64, String>,
        }
        let decoded: JoinSuccessPayload = serde_json::from_slice(&resp.result)
            .map_err(|e| RaftDriverError::Transport(format!("malformed join response: {e}")))?;
        Ok(JoinOutcome {
            assigned_id: decoded.assigned_id,
            peer_addrs: decoded.peer_addrs,
        })
    }
}
