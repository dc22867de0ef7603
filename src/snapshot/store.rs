//! Snapshot Store Contract
//!
//! The engine persists snapshots through [`SnapshotStore`] and never
//! deletes them; retention is the store's business.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use log::debug;
use thiserror::Error;

use super::codec::Snapshot;

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no snapshot stored for run '{0}'")]
    NotFound(String),

    #[error("run id '{0}' cannot be used as a storage key")]
    InvalidRunId(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Durable key-value persistence of snapshots, keyed by run id.
pub trait SnapshotStore: Send + Sync {
    /// Stores (or replaces) the snapshot for a run.
    fn save(&self, run_id: &str, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Loads the latest snapshot for a run.
    ///
    /// Fails with [`StorageError::NotFound`] if nothing is stored.
    fn load(&self, run_id: &str) -> Result<Snapshot, StorageError>;

    /// Ids of all stored runs, sorted.
    fn list_runs(&self) -> Result<Vec<String>, StorageError>;
}

/// Process-local store, mainly for tests and embedding.
///
/// Snapshots are kept encoded so every save/load goes through the same
/// codec as a durable store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, run_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let bytes = snapshot.encode()?;
        debug!("Saving snapshot for run '{}' ({} bytes)", run_id, bytes.len());
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.to_string(), bytes);
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Snapshot, StorageError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = snapshots
            .get(run_id)
            .ok_or_else(|| StorageError::NotFound(run_id.to_string()))?;
        Snapshot::decode(bytes)
    }

    fn list_runs(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::Run;
    use serde_json::json;

    fn snapshot(run_id: &str) -> Snapshot {
        Snapshot::capture(&Run::new(run_id, "wf", json!({"v": 1}), ["a"]))
    }

    #[test]
    fn test_save_and_load() {
        let store = InMemorySnapshotStore::new();
        let saved = snapshot("run-1");
        store.save("run-1", &saved).unwrap();

        assert_eq!(store.load("run-1").unwrap(), saved);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_missing() {
        let store = InMemorySnapshotStore::new();
        let err = store.load("nope").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no snapshot stored for run 'nope'");
    }

    #[test]
    fn test_save_replaces() {
        let store = InMemorySnapshotStore::new();
        store.save("run-1", &snapshot("run-1")).unwrap();

        let mut run = Run::new("run-1", "wf", json!({"v": 2}), ["a"]);
        run.mark_running("a").unwrap();
        let newer = Snapshot::capture(&run);
        store.save("run-1", &newer).unwrap();

        assert_eq!(store.load("run-1").unwrap(), newer);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_list_runs_sorted() {
        let store = InMemorySnapshotStore::new();
        assert!(store.is_empty());
        store.save("b", &snapshot("b")).unwrap();
        store.save("a", &snapshot("a")).unwrap();

        assert_eq!(store.list_runs().unwrap(), vec!["a", "b"]);
    }
}
