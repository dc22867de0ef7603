//! Snapshot Codec
//!
//! A [`Snapshot`] is the serializable projection of a [`Run`]: step
//! results (including each suspended step's continuation), active paths
//! and trigger data, wrapped in a versioned envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::state::Run;

use super::store::StorageError;

/// Current envelope format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub run: Run,
}

/// Only the version, read before committing to a full decode.
#[derive(Deserialize)]
struct Envelope {
    version: u32,
}

impl Snapshot {
    /// Captures the current state of a run.
    pub fn capture(run: &Run) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            run: run.clone(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// Rebuilds the run.
    pub fn into_run(self) -> Run {
        self.run
    }

    /// Encodes the snapshot as pretty-printed JSON.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a snapshot, rejecting unknown format versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(StorageError::UnsupportedVersion(envelope.version));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
