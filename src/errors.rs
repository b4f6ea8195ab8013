//! Error taxonomy for the Raft node driver.
//!
//! One `thiserror` enum per failure domain (see `config::ConfigError`): a
//! descriptive variant per failure mode rather than a single opaque error type.

use thiserror::Error;

/// Errors surfaced by the storage adapter (`storage::LogStore`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage corrupt at index {index}: {message}")]
    Corrupt { index: u64, message: String },

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("requested snapshot is out of date: have index {have}, need at least {need}")]
    SnapshotOutOfDate { have: u64, need: u64 },

    #[error("log entries up to index {0} have been compacted")]
    Compacted(u64),

    #[error("requested entries are not available: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the node driver to clients and to internal callers.
#[derive(Error, Debug, Clone)]
pub enum RaftDriverError {
    #[error("not the leader{}", .leader_hint.as_ref().map(|(id, addr)| format!(" (leader is {id} at {addr})")).unwrap_or_default())]
    NotLeader {
        leader_hint: Option<(u64, String)>,
    },

    #[error("leadership changed during redirect, retry the request")]
    LeadershipUnstable,

    #[error("proposal did not commit within the timeout")]
    ProposalTimeout,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("peer {0} unreachable")]
    PeerUnreachable(u64),

    #[error("state machine failed to apply entry at index {index}: {message}")]
    StateMachineError { index: u64, message: String },

    #[error("unknown or unsupported request: {0}")]
    UnknownRequest(String),

    #[error("no leader is currently known")]
    NoLeader,

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_leader_without_hint_has_plain_message() {
        let err = RaftDriverError::NotLeader { leader_hint: None };
        assert_eq!(err.to_string(), "not the leader");
    }

    #[test]
    fn not_leader_with_hint_names_the_leader() {
        let err = RaftDriverError::NotLeader {
            leader_hint: Some((3, "127.0.0.1:9003".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "not the leader (leader is 3 at 127.0.0.1:9003)"
        );
    }

    #[test]
    fn storage_error_converts_into_driver_error() {
        let storage_err = StorageError::Compacted(10);
        let driver_err: RaftDriverError = storage_err.into();
        assert!(matches!(
            driver_err,
            RaftDriverError::Storage(StorageError::Compacted(10))
        ));
    }

    #[test]
    fn compacted_message_names_the_index() {
        let err = StorageError::Compacted(42);
        assert_eq!(err.to_string(), "log entries up to index 42 have been compacted");
    }
}
