//! Durable continuity hints for in-flight jobs.
//!
//! All device identities share one JSON file mapping device id → [`JobSnapshotRecord`].
//! Writes go to a temporary file in the same directory, are synced, then renamed over the
//! target. One lock serializes every read-modify-write on the file, so a store must be the
//! only writer of its path (single owning process).
//!
//! The store is advisory: a missing, unreadable or corrupt file reads as "no snapshot" and
//! the next save rewrites it.
//!
//! Every method blocks on file I/O. Async callers run them on the blocking pool.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use printwatch_shared::JobSnapshotRecord;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace snapshot file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for `device_id`, or `None` if absent or unreadable.
    pub fn load(&self, device_id: &str) -> Option<JobSnapshotRecord> {
        let _guard = self.guard();
        self.read_all().remove(device_id)
    }

    pub fn save(&self, device_id: &str, record: &JobSnapshotRecord) -> Result<(), SnapshotError> {
        let _guard = self.guard();
        let mut records = self.read_all();
        records.insert(device_id.to_string(), record.clone());
        self.write_all(&records)?;
        tracing::debug!(device = device_id, job_id = %record.job_id, "Job snapshot saved");
        Ok(())
    }

    pub fn delete(&self, device_id: &str) -> Result<(), SnapshotError> {
        let _guard = self.guard();
        let mut records = self.read_all();
        if records.remove(device_id).is_some() {
            self.write_all(&records)?;
            tracing::debug!(device = device_id, "Job snapshot deleted");
        }
        Ok(())
    }

    /// Device identities that currently have a snapshot.
    pub fn list(&self) -> Vec<String> {
        let _guard = self.guard();
        self.read_all().into_keys().collect()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The lock protects the file, not in-memory data, so a poisoned lock is still usable.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_all(&self) -> BTreeMap<String, JobSnapshotRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read snapshot file: {}", e);
                return BTreeMap::new();
            }
        };

        let raw: BTreeMap<String, Value> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Snapshot file is corrupt, ignoring it: {}", e);
                return BTreeMap::new();
            }
        };

        raw.into_iter()
            .filter_map(|(device, value)| match serde_json::from_value(value) {
                Ok(record) => Some((device, record)),
                Err(e) => {
                    tracing::warn!(device = %device, "Dropping unreadable snapshot record: {}", e);
                    None
                }
            })
            .collect()
    }

    fn write_all(&self, records: &BTreeMap<String, JobSnapshotRecord>) -> Result<(), SnapshotError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, records)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
