//! Peer transport: the `RaftTransport` gRPC service (component G).
//!
//! A proto envelope carrying an opaque payload, over the two RPCs this
//! driver needs: one-shot Raft message delivery, and the leader-side
//! reroute endpoint the Mailbox calls after a `WrongLeader` redirect.

use std::net::SocketAddr;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::errors::RaftDriverError;
use crate::node::NodeHandle;

pub mod proto {
    tonic::include_proto!("raft_runtime");
}

use proto::raft_transport_client::RaftTransportClient;
use proto::raft_transport_server::{RaftTransport, RaftTransportServer};
use proto::{Ack, RaftMessageEnvelope, RerouteRequest, RerouteResponse};

/// Builds a lazily-connecting client to a peer's transport endpoint. Shared
/// by the peer sender and the mailbox's redirect path so both use the same
/// timeouts and URI normalization.
pub fn connect_lazy(addr: &str) -> Result<RaftTransportClient<Channel>, RaftDriverError> {
    let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| RaftDriverError::Transport(format!("invalid peer address {addr}: {e}")))?
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(4));
    Ok(RaftTransportClient::new(endpoint.connect_lazy()))
}

#[derive(Clone)]
pub struct RaftTransportService {
    node: NodeHandle,
}

impl RaftTransportService {
    pub fn new(node: NodeHandle) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl RaftTransport for RaftTransportService {
    async fn send_raft_message(
        &self,
        req: Request<RaftMessageEnvelope>,
    ) -> Result<Response<Ack>, Status> {
        let bytes = req.into_inner().message;
        let msg: raft::eraftpb::Message = protobuf::Message::parse_from_bytes(&bytes)
            .map_err(|e| Status::invalid_argument(format!("failed to decode raft message: {e}")))?;

        self.node
            .step(msg)
            .await
            .map_err(|e| Status::internal(format!("step failed: {e}")))?;

        Ok(Response::new(Ack {}))
    }

    async fn reroute_message(
        &self,
        req: Request<RerouteRequest>,
    ) -> Result<Response<RerouteResponse>, Status> {
        let inner = req.into_inner();
        match self.node.handle_reroute(inner.kind, inner.payload).await {
            Ok(result) => Ok(Response::new(RerouteResponse {
                success: true,
                result,
                wrong_leader_id: None,
                wrong_leader_addr: None,
            })),
            Err(RaftDriverError::NotLeader { leader_hint }) => {
                let (id, addr) = leader_hint.unzip();
                Ok(Response::new(RerouteResponse {
                    success: false,
                    result: Vec::new(),
                    wrong_leader_id: id,
                    wrong_leader_addr: addr,
                }))
            }
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}

/// Starts the gRPC server bound to `bind_addr`. Runs indefinitely; spawn in
/// a background task.
pub async fn start_transport_server(bind_addr: String, node: NodeHandle) {
    let addr: SocketAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 7000).into());

    info!(addr = %addr, "raft transport server starting");

    if let Err(e) = tonic::transport::Server::builder()
        .add_service(RaftTransportServer::new(RaftTransportService::new(node)))
        .serve(addr)
        .await
    {
        error!(error = %e, "raft transport server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LoopConfig, NodeLoop};
    use crate::peer::{PeerRegistry, SenderConfig};
    use crate::state_machine::KvStateMachine;
    use crate::storage::LogStore;
    use proto::RerouteKind;
    use raft::Config as RaftConfig;
    use raft::eraftpb::MessageType;

    async fn leader_service() -> RaftTransportService {
        let storage = LogStore::new();
        storage.bootstrap_leader(1).unwrap();
        let raft_cfg = RaftConfig {
            id: 1,
            election_tick: 10,
            heartbeat_tick: 3,
            ..Default::default()
        };
        let (node_loop, handle) = NodeLoop::new(
            1,
            raft_cfg,
            storage,
            Box::new(KvStateMachine::new()),
            PeerRegistry::new(),
            slog::Logger::root(slog::Discard, slog::o!()),
            LoopConfig {
                loop_heartbeat: Duration::from_millis(20),
                snapshot_interval: Duration::from_secs(60),
                proposal_timeout: Duration::from_secs(2),
            },
            SenderConfig {
                message_timeout: Duration::from_millis(100),
                message_max_retries: 3,
            },
        )
        .unwrap();
        tokio::spawn(node_loop.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        RaftTransportService::new(handle)
    }

    #[tokio::test]
    async fn send_raft_message_steps_a_stale_heartbeat_without_error() {
        let service = leader_service().await;

        let mut msg = raft::eraftpb::Message::default();
        msg.set_msg_type(MessageType::MsgHeartbeat);
        msg.to = 1;
        msg.from = 1;
        msg.term = 0;
        let mut bytes = Vec::new();
        protobuf::Message::write_to_vec(&msg, &mut bytes).unwrap();

        let resp = service
            .send_raft_message(Request::new(RaftMessageEnvelope { message: bytes }))
            .await;
        assert!(resp.is_ok());
    }

    #[tokio::test]
    async fn reroute_message_rejects_unknown_kind() {
        let service = leader_service().await;

        let resp = service
            .reroute_message(Request::new(RerouteRequest { kind: 99, payload: Vec::new() }))
            .await;
        assert!(resp.is_err());
    }

    #[tokio::test]
    async fn reroute_message_reserves_an_id_on_the_leader() {
        let service = leader_service().await;

        let resp = service
            .reroute_message(Request::new(RerouteRequest {
                kind: RerouteKind::RequestId as i32,
                payload: Vec::new(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(resp.success);
        let id = crate::id::decode_u64(&resp.result).unwrap();
        assert_eq!(id, 2);
    }
}
