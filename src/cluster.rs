//! Cluster control surface (component H): a small HTTP API for membership
//! operations and peer introspection, layered over the [`crate::mailbox`].
//!
//! Built on bare hyper (`make_service_fn`/`service_fn`, manual path match,
//! JSON body) serving the four routes this driver needs: peer introspection,
//! id reservation, and the two membership-change operations.

use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::RaftDriverError;
use crate::mailbox::Mailbox;

#[derive(Clone)]
pub struct ClusterHandle {
    mailbox: Mailbox,
}

impl ClusterHandle {
    pub fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }
}

#[derive(Serialize)]
struct WrongLeaderBody {
    wrong_leader: WrongLeaderHint,
}

#[derive(Serialize)]
struct WrongLeaderHint {
    id: u64,
    addr: Option<String>,
}

#[derive(Deserialize)]
struct JoinRequest {
    node_id: u64,
    addr: String,
}

#[derive(Serialize)]
struct JoinResponse {
    assigned_id: u64,
    peer_addrs: std::collections::HashMap<u64, String>,
}

#[derive(Deserialize)]
struct LeaveRequest {
    node_id: u64,
    addr: String,
}

fn json_response(status: StatusCode, body: impl Serialize) -> Response<Body> {
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(bytes))
        .unwrap()
}

fn error_response(err: RaftDriverError) -> Response<Body> {
    match err {
        RaftDriverError::NotLeader { leader_hint } => json_response(
            StatusCode::CONFLICT,
            WrongLeaderBody {
                wrong_leader: WrongLeaderHint {
                    id: leader_hint.as_ref().map(|(id, _)| *id).unwrap_or(0),
                    addr: leader_hint.and_then(|(_, addr)| (!addr.is_empty()).then_some(addr)),
                },
            },
        ),
        RaftDriverError::NoLeader => {
            json_response(StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({ "error": err.to_string() }))
        }
        RaftDriverError::ProposalTimeout | RaftDriverError::LeadershipUnstable => {
            json_response(StatusCode::GATEWAY_TIMEOUT, serde_json::json!({ "error": err.to_string() }))
        }
        other => json_response(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "error": other.to_string() })),
    }
}

async fn read_json_body<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            return Err(json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("failed to read body: {e}") }),
            ))
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": format!("invalid request body: {e}") }),
        )
    })
}

async fn route(req: Request<Body>, handle: ClusterHandle) -> Result<Response<Body>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/peers") => {
            let peers = handle.mailbox.peers_snapshot_all();
            json_response(StatusCode::OK, peers)
        }
        (&Method::POST, "/request_id") => match handle.mailbox.request_id().await {
            Ok(id) => json_response(StatusCode::OK, serde_json::json!({ "id": id })),
            Err(e) => error_response(e),
        },
        (&Method::POST, "/join") => match read_json_body::<JoinRequest>(req).await {
            Ok(body) => match handle.mailbox.join(body.node_id, body.addr).await {
                Ok(outcome) => json_response(
                    StatusCode::OK,
                    JoinResponse {
                        assigned_id: outcome.assigned_id,
                        peer_addrs: outcome.peer_addrs,
                    },
                ),
                Err(e) => error_response(e),
            },
            Err(resp) => resp,
        },
        (&Method::POST, "/leave") => match read_json_body::<LeaveRequest>(req).await {
            Ok(body) => match handle.mailbox.leave(body.node_id, body.addr).await {
                Ok(()) => json_response(StatusCode::OK, serde_json::json!({ "ok": true })),
                Err(e) => error_response(e),
            },
            Err(resp) => resp,
        },
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap(),
    };
    Ok(response)
}

/// Starts the cluster control surface HTTP server. Serves `GET /peers`,
/// `POST /request_id`, `POST /join`, and `POST /leave`; every other path
/// 404s. Runs indefinitely, spawn in a background task.
pub async fn start_control_server(bind_addr: String, handle: ClusterHandle) {
    let addr: SocketAddr = bind_addr.parse().unwrap_or_else(|_| ([0, 0, 0, 0], 8080).into());

    let make_svc = make_service_fn(move |_conn| {
        let handle = handle.clone();
        async move { Ok::<_, hyper::Error>(service_fn(move |req| route(req, handle.clone()))) }
    });

    info!(addr = %addr, "cluster control surface starting — GET /peers, POST /request_id, POST /join, POST /leave");

    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(error = %e, "cluster control server error");
    }
}
