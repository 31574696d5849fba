//! Durable snapshots of the offline queue.
//!
//! Snapshots are best effort: the queue is not authoritative and a lost or
//! unreadable snapshot only means queued work is gone.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::queue::QueuedOperation;

/// A serialized queue: operations in drain order plus when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Operations in drain order.
    pub operations: Vec<QueuedOperation>,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Creates a snapshot stamped with the current time.
    #[must_use]
    pub fn new(operations: Vec<QueuedOperation>) -> Self {
        Self {
            operations,
            saved_at: Utc::now(),
        }
    }
}

/// Storage for queue snapshots.
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Writes a snapshot, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn save(&self, snapshot: &QueueSnapshot) -> Result<()>;

    /// Reads the last snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot exists but cannot be read.
    fn load(&self) -> Result<Option<QueueSnapshot>>;
}

/// Stores the snapshot as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileQueueStore {
    path: PathBuf,
}

impl JsonFileQueueStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for JsonFileQueueStore {
    fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            operations = snapshot.operations.len(),
            "Saved queue snapshot"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<QueueSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::queue::OperationPriority;
    use serde_json::json;

    #[test]
    fn missing_file_loads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileQueueStore::new(dir.path().join("queue.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileQueueStore::new(dir.path().join("nested/queue.json"));

        let snapshot = QueueSnapshot::new(vec![
            QueuedOperation::new("upload", json!({"file": "a.csv"}))
                .with_id("first")
                .with_priority(OperationPriority::Critical),
            QueuedOperation::new("sync", json!(null)).with_id("second"),
        ]);
        store.save(&snapshot).expect("save");

        let loaded = store.load().expect("load").expect("snapshot");
        let ids: Vec<_> = loaded.operations.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(loaded.saved_at, snapshot.saved_at);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        fs::write(&path, b"not json").expect("write");

        let err = JsonFileQueueStore::new(path).load().unwrap_err();
        assert!(matches!(err, NetworkError::Persistence(_)));
    }
}
