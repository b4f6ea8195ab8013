//! The user-supplied application state machine contract.
//!
//! The node driver treats the state machine as an opaque collaborator: it
//! calls `apply` on every committed normal entry, `snapshot` on the
//! snapshot/compaction cadence, and `restore` when installing a snapshot
//! received from the leader.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deterministic application logic driven by committed log entries.
///
/// Implementations must be deterministic: given the same sequence of
/// `apply` calls on every replica, the resulting state and return values
/// must be identical.
pub trait StateMachine: Send {
    /// Applies a committed entry's payload, returning an opaque result
    /// delivered back to the proposing client.
    fn apply(&mut self, data: &[u8]) -> Vec<u8>;

    /// Serializes the entire state for a snapshot.
    fn snapshot(&self) -> Vec<u8>;

    /// Replaces the entire state from a snapshot's bytes.
    fn restore(&mut self, data: &[u8]);
}

/// Commands understood by [`KvStateMachine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KvCommand {
    Set { key: String, value: String },
    Delete { key: String },
}

/// Reference state machine: a `BTreeMap<String, String>` driven by
/// JSON-encoded [`KvCommand`] entries. Ships for tests and as a worked
/// example of the `StateMachine` contract.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    data: BTreeMap<String, String>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }
        let result = match serde_json::from_slice::<KvCommand>(data) {
            Ok(KvCommand::Set { key, value }) => {
                self.data.insert(key, value);
                b"ok".to_vec()
            }
            Ok(KvCommand::Delete { key }) => {
                self.data.remove(&key);
                b"ok".to_vec()
            }
            Err(e) => format!("invalid command: {e}").into_bytes(),
        };
        result
    }

    fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(&self.data).unwrap_or_default()
    }

    fn restore(&mut self, data: &[u8]) {
        self.data = serde_json::from_slice(data).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let mut sm = KvStateMachine::new();
        let cmd = serde_json::to_vec(&KvCommand::Set {
            key: "a".into(),
            value: "1".into(),
        })
        .unwrap();
        let result = sm.apply(&cmd);
        assert_eq!(result, b"ok");
        assert_eq!(sm.get("a"), Some(&"1".to_string()));
    }

    #[test]
    fn delete_removes_key() {
        let mut sm = KvStateMachine::new();
        sm.apply(&serde_json::to_vec(&KvCommand::Set { key: "a".into(), value: "1".into() }).unwrap());
        sm.apply(&serde_json::to_vec(&KvCommand::Delete { key: "a".into() }).unwrap());
        assert!(sm.get("a").is_none());
    }

    #[test]
    fn empty_payload_is_a_noop() {
        let mut sm = KvStateMachine::new();
        assert_eq!(sm.apply(&[]), Vec::<u8>::new());
        assert!(sm.is_empty());
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut sm = KvStateMachine::new();
        sm.apply(&serde_json::to_vec(&KvCommand::Set { key: "a".into(), value: "1".into() }).unwrap());
        sm.apply(&serde_json::to_vec(&KvCommand::Set { key: "b".into(), value: "2".into() }).unwrap());
        let snap = sm.snapshot();

        let mut restored = KvStateMachine::new();
        restored.restore(&snap);
        assert_eq!(restored.get("a"), Some(&"1".to_string()));
        assert_eq!(restored.get("b"), Some(&"2".to_string()));
        assert_eq!(restored.len(), sm.len());
    }

    #[test]
    fn invalid_command_reports_error_without_panicking() {
        let mut sm = KvStateMachine::new();
        let result = sm.apply(b"not json");
        assert!(String::from_utf8(result).unwrap().starts_with("invalid command"));
    }
}
