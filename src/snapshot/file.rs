//! File Snapshot Store
//!
//! Stores each run's snapshot as `{dir}/{key}.snapshot.json`, where the key
//! is the percent-encoded run id. Writes go to a temporary file that is
//! renamed into place, so readers never see a partially written snapshot.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::codec::Snapshot;
use super::store::{SnapshotStore, StorageError};

const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// Directory-backed [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store rooted at `dir`; the directory is created on the
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the snapshot file path for a run.
    ///
    /// Only the empty id is refused; anything else is encoded.
    pub fn snapshot_path(&self, run_id: &str) -> Result<PathBuf, StorageError> {
        if run_id.is_empty() {
            return Err(StorageError::InvalidRunId(run_id.to_string()));
        }
        Ok(self
            .dir
            .join(format!("{}{}", file_key(run_id), SNAPSHOT_SUFFIX)))
    }
}

/// Percent-encodes a run id into a file name stem.
///
/// Path separators and non-ASCII are escaped by the encoding itself; a
/// leading dot is escaped too so `.` and `..` never reach the filesystem.
fn file_key(run_id: &str) -> String {
    let encoded = urlencoding::encode(run_id);
    if let Some(rest) = encoded.strip_prefix('.') {
        return format!("%2E{}", rest);
    }
    encoded.into_owned()
}

/// Inverse of [`file_key`]; `None` for names this store did not write.
fn run_id_from_key(key: &str) -> Option<String> {
    let run_id = urlencoding::decode(key).ok()?.into_owned();
    (!run_id.is_empty() && file_key(&run_id) == key).then_some(run_id)
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, run_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let path = self.snapshot_path(run_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let bytes = snapshot.encode()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;

        debug!("Saved snapshot for run '{}' to {}", run_id, path.display());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Snapshot, StorageError> {
        let path = self.snapshot_path(run_id)?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(run_id.to_string()));
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        let snapshot = Snapshot::decode(&bytes)?;
        info!("Loaded snapshot for run '{}' from {}", run_id, path.display());
        Ok(snapshot)
    }

    fn list_runs(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(SNAPSHOT_SUFFIX))
                .and_then(run_id_from_key)
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}
