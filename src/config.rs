//! Node configuration, loaded from the environment (component I).
//!
//! Typed `env_*` helpers, a single `thiserror` enum for anything malformed,
//! and a `for_testing()` constructor so unit tests never touch the process
//! environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("malformed CLUSTER_NODES entry {entry:?}: {message}")]
    InvalidClusterNodes { entry: String, message: String },
}

/// Tunables for the node driver and the raft library underneath it.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's own Raft id.
    pub node_id: u64,
    /// Address the gRPC Raft transport binds to.
    pub bind_addr: String,
    /// Address the HTTP cluster control surface (`/peers`, `/join`,
    /// `/leave`) binds to.
    pub control_addr: String,
    /// Directory the storage adapter would persist to (reserved for a
    /// future on-disk backend; the in-memory adapter only validates it).
    pub data_dir: String,
    /// Other cluster members known at startup, `id -> addr`. The first
    /// entry whose id equals `node_id` bootstraps as the single-node
    /// leader; an empty map also bootstraps as leader.
    pub cluster_nodes: HashMap<u64, String>,

    pub election_tick: usize,
    pub heartbeat_tick: usize,
    pub loop_heartbeat: Duration,
    pub message_timeout: Duration,
    pub message_max_retries: u32,
    pub proposal_timeout: Duration,
    pub snapshot_interval: Duration,
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms_or(name: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(env_parse_or(name, default_ms)?))
}

/// Parses `CLUSTER_NODES` as a comma-separated `id=addr` list, e.g.
/// `1=127.0.0.1:9001,2=127.0.0.1:9002`.
fn parse_cluster_nodes(raw: &str) -> Result<HashMap<u64, String>, ConfigError> {
    let mut nodes = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id_str, addr) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidClusterNodes {
            entry: entry.into(),
            message: "expected the form id=addr".into(),
        })?;
        let id: u64 = id_str.parse().map_err(|_| ConfigError::InvalidClusterNodes {
            entry: entry.into(),
            message: "id is not a valid u64".into(),
        })?;
        nodes.insert(id, addr.to_string());
    }
    Ok(nodes)
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id: u64 = env_required("NODE_ID")?
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                var: "NODE_ID".into(),
                message: e.to_string(),
            })?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:7000".to_string());
        let control_addr = env::var("CONTROL_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let cluster_nodes = match env::var("CLUSTER_NODES") {
            Ok(raw) => parse_cluster_nodes(&raw)?,
            Err(_) => HashMap::new(),
        };

        Ok(NodeConfig {
            node_id,
            bind_addr,
            control_addr,
            data_dir,
            cluster_nodes,
            election_tick: env_parse_or("ELECTION_TICK", 10)?,
            heartbeat_tick: env_parse_or("HEARTBEAT_TICK", 3)?,
            loop_heartbeat: env_duration_ms_or("LOOP_HEARTBEAT_MS", 100)?,
            message_timeout: env_duration_ms_or("MESSAGE_TIMEOUT_MS", 100)?,
            message_max_retries: env_parse_or("MESSAGE_MAX_RETRIES", 5)?,
            proposal_timeout: env_duration_ms_or("PROPOSAL_TIMEOUT_MS", 2000)?,
            snapshot_interval: env_duration_ms_or("SNAPSHOT_INTERVAL_MS", 15_000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_tick == 0 {
            return Err(ConfigError::InvalidValue {
                var: "ELECTION_TICK".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.heartbeat_tick == 0 || self.heartbeat_tick >= self.election_tick {
            return Err(ConfigError::InvalidValue {
                var: "HEARTBEAT_TICK".into(),
                message: "must be greater than 0 and less than ELECTION_TICK".into(),
            });
        }
        if self.message_max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MESSAGE_MAX_RETRIES".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.cluster_nodes.contains_key(&self.node_id) {
            return Err(ConfigError::InvalidValue {
                var: "CLUSTER_NODES".into(),
                message: "must not list this node's own NODE_ID as a peer".into(),
            });
        }
        Ok(())
    }

    /// A single-node-leader config for tests, bypassing the environment.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        NodeConfig {
            node_id: 1,
            bind_addr: "127.0.0.1:7001".into(),
            control_addr: "127.0.0.1:8001".into(),
            data_dir: "./data".into(),
            cluster_nodes: HashMap::new(),
            election_tick: 10,
            heartbeat_tick: 3,
            loop_heartbeat: Duration::from_millis(100),
            message_timeout: Duration::from_millis(100),
            message_max_retries: 5,
            proposal_timeout: Duration::from_secs(2),
            snapshot_interval: Duration::from_secs(15),
        }
    }

    pub fn print_summary(&self) {
        println!("Starting raft node:");
        println!("  Node id: {}", self.node_id);
        println!("  Bind address: {}", self.bind_addr);
        println!("  Data directory: {}", self.data_dir);
        println!("  Known peers: {}", self.cluster_nodes.len());
        println!(
            "  election_tick={} heartbeat_tick={} snapshot_interval={:?}",
            self.election_tick, self.heartbeat_tick, self.snapshot_interval
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_testing_validates() {
        NodeConfig::for_testing().validate().unwrap();
    }

    #[test]
    fn parses_cluster_nodes() {
        let nodes = parse_cluster_nodes("1=127.0.0.1:9001, 2=127.0.0.1:9002").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.get(&2), Some(&"127.0.0.1:9002".to_string()));
    }

    #[test]
    fn empty_cluster_nodes_is_allowed() {
        assert!(parse_cluster_nodes("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_entry() {
        let err = parse_cluster_nodes("not-an-entry").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidClusterNodes { .. }));
    }

    #[test]
    fn heartbeat_must_be_below_election_tick() {
        let mut cfg = NodeConfig::for_testing();
        cfg.heartbeat_tick = cfg.election_tick;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_self_in_cluster_nodes() {
        let mut cfg = NodeConfig::for_testing();
        cfg.cluster_nodes.insert(cfg.node_id, "127.0.0.1:9001".into());
        assert!(cfg.validate().is_err());
    }
}
