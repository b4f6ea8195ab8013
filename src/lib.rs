//! Core of a Raft-based replicated state machine runtime: the per-node
//! consensus driver that turns a single Raft instance into a coherent
//! cluster member.

pub mod cluster;
pub mod config;
pub mod errors;
pub mod id;
pub mod logging;
pub mod mailbox;
pub mod node;
pub mod peer;
pub mod state_machine;
pub mod storage;
pub mod transport;

pub use errors::{RaftDriverError, StorageError};
pub use mailbox::{JoinOutcome, Mailbox};
pub use node::{NodeHandle, NodeLoop};
pub use state_machine::{KvCommand, KvStateMachine, StateMachine};
