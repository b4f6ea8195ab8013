//! Durable storage adapter (component B).
//!
//! Implements `raft::Storage` for the `RawNode` read path and exposes the
//! write-side operations the node loop drives during the readiness cycle.
//! Keeps hard state, conf state, snapshot metadata/data, and the log in an
//! in-process `RwLock`-guarded structure, in the same shape as `raft-rs`'s
//! own `MemStorage`. A real deployment swaps this for an embedded ordered
//! store; the key space (`hard_state`, `conf_state`, `snapshot_meta`,
//! `snapshot_data`, log-by-index) is designed to map onto one directly.

use std::sync::{Arc, RwLock};

use raft::eraftpb::{ConfState, Entry, HardState, Snapshot, SnapshotMetadata};
use raft::{Error as RaftError, GetEntriesContext, RaftState, Storage as RaftStorageTrait};
use raft::StorageError as RaftStorageError;

use crate::errors::StorageError;

struct Core {
    hard_state: HardState,
    conf_state: ConfState,
    entries: Vec<Entry>,
    snapshot_metadata: SnapshotMetadata,
    snapshot_data: Vec<u8>,
}

impl Core {
    fn new() -> Self {
        Self {
            hard_state: HardState::default(),
            conf_state: ConfState::default(),
            // A sentinel entry occupies entries[0]; real entries start at
            // index 1, matching raft-rs's own MemStorage convention so index
            // arithmetic below stays index == entries[index].get_index().
            entries: vec![Entry::default()],
            snapshot_metadata: SnapshotMetadata::default(),
            snapshot_data: Vec::new(),
        }
    }

    fn first_index(&self) -> u64 {
        self.entries[0].index + 1
    }

    fn last_index(&self) -> u64 {
        match self.entries.last() {
            Some(e) if e.index != 0 => e.index,
            _ => self.entries[0].index,
        }
    }

    fn entry_offset(&self, idx: u64) -> Option<usize> {
        let base = self.entries[0].index;
        if idx < base {
            None
        } else {
            Some((idx - base) as usize)
        }
    }
}

/// The storage adapter handed to `RawNode::new` and driven by the node loop.
///
/// Cheaply `Clone`, like `raft-rs`'s own `MemStorage`: the node loop keeps
/// one handle for writes (`append`, `set_hard_state`, snapshot/compact) and
/// hands a clone to `RawNode::new`, which only ever reads through the
/// `Storage` trait.
#[derive(Clone)]
pub struct LogStore {
    core: Arc<RwLock<Core>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    pub fn new() -> Self {
        Self {
            core: Arc::new(RwLock::new(Core::new())),
        }
    }

    /// Bootstrap a single-node leader: an initial snapshot at
    /// `(index=1, term=1, voters=[own_id])`, applied before the first
    /// election so the leader's own conf state is already durable.
    pub fn bootstrap_leader(&self, own_id: u64) -> Result<(), StorageError> {
        let mut conf_state = ConfState::default();
        conf_state.mut_voters().push(own_id);

        let mut meta = SnapshotMetadata::default();
        meta.index = 1;
        meta.term = 1;
        meta.set_conf_state(conf_state.clone());

        let mut core = self.core.write().unwrap();
        core.snapshot_metadata = meta.clone();
        core.conf_state = conf_state;
        core.entries = vec![{
            let mut e = Entry::default();
            e.index = 1;
            e.term = 1;
            e
        }];
        core.hard_state.term = 1;
        core.hard_state.commit = 1;
        Ok(())
    }

    /// Appends `entries` to the log, truncating any conflicting suffix first.
    pub fn append(&self, entries: &[Entry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut core = self.core.write().unwrap();
        let first = entries[0].index;
        let base = core.entries[0].index;
        if first < base {
            return Err(StorageError::Compacted(base));
        }
        let keep = (first - base) as usize;
        if keep < core.entries.len() {
            core.entries.truncate(keep);
        } else if keep > core.entries.len() {
            return Err(StorageError::Io(format!(
                "append gap: have up to {}, got first {}",
                core.entries.len() as u64 + base - 1,
                first
            )));
        }
        core.entries.extend_from_slice(entries);
        Ok(())
    }

    pub fn set_hard_state(&self, hs: HardState) -> Result<(), StorageError> {
        self.core.write().unwrap().hard_state = hs;
        Ok(())
    }

    pub fn set_commit_index(&self, commit: u64) -> Result<(), StorageError> {
        self.core.write().unwrap().hard_state.commit = commit;
        Ok(())
    }

    pub fn set_conf_state(&self, cs: ConfState) -> Result<(), StorageError> {
        self.core.write().unwrap().conf_state = cs;
        Ok(())
    }

    pub fn current_conf_state(&self) -> ConfState {
        self.core.read().unwrap().conf_state.clone()
    }

    pub fn commit_index(&self) -> u64 {
        self.core.read().unwrap().hard_state.commit
    }

    /// Installs a snapshot received from the leader, discarding any log
    /// prefix it supersedes.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let meta = snapshot.get_metadata();
        let mut core = self.core.write().unwrap();

        if meta.index <= core.snapshot_metadata.index {
            return Err(StorageError::SnapshotOutOfDate {
                have: core.snapshot_metadata.index,
                need: meta.index,
            });
        }

        core.conf_state = meta.get_conf_state().clone();
        core.snapshot_metadata = meta.clone();
        core.snapshot_data = snapshot.get_data().to_vec();
        core.entries = vec![{
            let mut e = Entry::default();
            e.index = meta.index;
            e.term = meta.term;
            e
        }];
        core.hard_state.term = core.hard_state.term.max(meta.term);
        core.hard_state.commit = meta.index;
        Ok(())
    }

    /// Captures a new snapshot at `(index, term)` over `data`, the state
    /// machine's serialized form.
    pub fn create_snapshot(
        &self,
        data: Vec<u8>,
        index: u64,
        term: u64,
        conf_state: ConfState,
    ) -> Result<(), StorageError> {
        let mut core = self.core.write().unwrap();
        let mut meta = SnapshotMetadata::default();
        meta.index = index;
        meta.term = term;
        meta.set_conf_state(conf_state);
        core.snapshot_metadata = meta;
        core.snapshot_data = data;
        Ok(())
    }

    /// Discards log entries up to and including `up_to_index`. Must only be
    /// called once a snapshot covering that index is durable.
    pub fn compact(&self, up_to_index: u64) -> Result<(), StorageError> {
        let mut core = self.core.write().unwrap();
        if up_to_index > core.snapshot_metadata.index {
            return Err(StorageError::SnapshotOutOfDate {
                have: core.snapshot_metadata.index,
                need: up_to_index,
            });
        }
        let base = core.entries[0].index;
        if up_to_index <= base {
            return Ok(());
        }
        let offset = (up_to_index - base) as usize;
        if offset >= core.entries.len() {
            return Err(StorageError::Compacted(up_to_index));
        }
        core.entries.drain(0..offset);
        Ok(())
    }

    pub fn term_of(&self, index: u64) -> Option<u64> {
        let core = self.core.read().unwrap();
        if index == core.snapshot_metadata.index {
            return Some(core.snapshot_metadata.term);
        }
        core.entry_offset(index)
            .and_then(|off| core.entries.get(off))
            .map(|e| e.term)
    }
}

impl RaftStorageTrait for LogStore {
    fn initial_state(&self) -> raft::Result<RaftState> {
        let core = self.core.read().unwrap();
        Ok(RaftState {
            hard_state: core.hard_state.clone(),
            conf_state: core.conf_state.clone(),
        })
    }

    fn entries(
        &self,
        low: u64,
        high: u64,
        max_size: impl Into<Option<u64>>,
        _context: GetEntriesContext,
    ) -> raft::Result<Vec<Entry>> {
        let core = self.core.read().unwrap();
        if low < core.first_index() {
            return Err(RaftError::Store(RaftStorageError::Compacted));
        }
        if high > core.last_index() + 1 {
            return Err(RaftError::Store(RaftStorageError::Unavailable));
        }
        let base = core.entries[0].index;
        let lo = (low - base) as usize;
        let hi = (high - base) as usize;
        let mut ents: Vec<Entry> = core.entries[lo..hi].to_vec();
        raft::util::limit_size(&mut ents, max_size.into());
        Ok(ents)
    }

    fn term(&self, idx: u64) -> raft::Result<u64> {
        let core = self.core.read().unwrap();
        if idx == core.snapshot_metadata.index {
            return Ok(core.snapshot_metadata.term);
        }
        match core.entry_offset(idx).and_then(|off| core.entries.get(off)) {
            Some(e) => Ok(e.term),
            None => Err(RaftError::Store(RaftStorageError::Unavailable)),
        }
    }

    fn first_index(&self) -> raft::Result<u64> {
        Ok(self.core.read().unwrap().first_index())
    }

    fn last_index(&self) -> raft::Result<u64> {
        Ok(self.core.read().unwrap().last_index())
    }

    fn snapshot(&self, request_index: u64, _to: u64) -> raft::Result<Snapshot> {
        let core = self.core.read().unwrap();
        if core.snapshot_metadata.index < request_index {
            return Err(RaftError::Store(RaftStorageError::SnapshotTemporarilyUnavailable));
        }
        let mut snap = Snapshot::default();
        snap.set_data(core.snapshot_data.clone());
        snap.set_metadata(core.snapshot_metadata.clone());
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> Entry {
        let mut e = Entry::default();
        e.index = index;
        e.term = term;
        e
    }

    #[test]
    fn bootstrap_leader_sets_initial_snapshot() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();
        assert_eq!(store.current_conf_state().get_voters(), &[1]);
        assert_eq!(RaftStorageTrait::first_index(&store).unwrap(), 2);
        assert_eq!(RaftStorageTrait::last_index(&store).unwrap(), 1);
    }

    #[test]
    fn append_and_read_entries() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();
        store.append(&[entry(2, 1), entry(3, 1)]).unwrap();
        let ents = RaftStorageTrait::entries(&store, 2, 4, None, GetEntriesContext::empty(false))
            .unwrap();
        assert_eq!(ents.len(), 2);
        assert_eq!(ents[0].index, 2);
        assert_eq!(ents[1].index, 3);
    }

    #[test]
    fn append_truncates_conflicting_suffix() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();
        store.append(&[entry(2, 1), entry(3, 1), entry(4, 1)]).unwrap();
        store.append(&[entry(3, 2)]).unwrap();
        assert_eq!(RaftStorageTrait::last_index(&store).unwrap(), 3);
        assert_eq!(RaftStorageTrait::term(&store, 3).unwrap(), 2);
    }

    #[test]
    fn compact_discards_prefix_and_rejects_ahead_of_snapshot() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();
        store.append(&[entry(2, 1), entry(3, 1)]).unwrap();

        let err = store.compact(3).unwrap_err();
        assert!(matches!(err, StorageError::SnapshotOutOfDate { .. }));

        store
            .create_snapshot(vec![], 3, 1, store.current_conf_state())
            .unwrap();
        store.compact(3).unwrap();
        assert_eq!(RaftStorageTrait::first_index(&store).unwrap(), 4);
    }

    #[test]
    fn apply_snapshot_rejects_stale_snapshot() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();

        let mut meta = SnapshotMetadata::default();
        meta.index = 1;
        meta.term = 1;
        let mut snap = Snapshot::default();
        snap.set_metadata(meta);

        let err = store.apply_snapshot(&snap).unwrap_err();
        assert!(matches!(err, StorageError::SnapshotOutOfDate { .. }));
    }

    #[test]
    fn entries_before_first_index_are_compacted() {
        let store = LogStore::new();
        store.bootstrap_leader(1).unwrap();
        store.append(&[entry(2, 1), entry(3, 1)]).unwrap();
        store
            .create_snapshot(vec![], 3, 1, store.current_conf_state())
            .unwrap();
        store.compact(3).unwrap();

        let err =
            RaftStorageTrait::entries(&store, 2, 4, None, GetEntriesContext::empty(false))
                .unwrap_err();
        assert!(matches!(err, RaftError::Store(RaftStorageError::Compacted)));
    }
}
