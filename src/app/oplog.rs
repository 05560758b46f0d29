//! Durable operation log
//!
//! A keyed record of in-flight operations backed by one JSON file of the
//! form `{id: {status, data}}`. Every mutation rewrites the whole file
//! before returning, and a log constructed against an existing file starts
//! from exactly what was last written there.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::operation::Operation;
use crate::app::paths;
use crate::errors::{OperationLogError, OperationLogResult};

/// Lifecycle state of a logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Completed,
}

/// One persisted log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub status: OperationStatus,
    pub data: Operation,
}

/// A pending operation together with its identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,
    pub data: Operation,
}

/// Write-through operation log
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    cache: BTreeMap<String, LogRecord>,
}

impl OperationLog {
    /// Open the log at `path`, reloading any state a previous process left
    ///
    /// A missing file starts an empty log. An unreadable or corrupt file is
    /// logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring corrupt operation log {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read operation log {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        debug!(
            "Opened operation log {} with {} entries",
            path.display(),
            cache.len()
        );
        Self { path, cache }
    }

    /// Backing file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `operation` as pending under `id`, replacing any previous record
    ///
    /// The whole log is rewritten before this returns, so a crash right
    /// after still leaves the record on disk.
    ///
    /// # Errors
    ///
    /// Returns `OperationLogError::Io` if the log file cannot be written
    pub fn log(&mut self, id: &str, operation: &Operation) -> OperationLogResult<()> {
        self.cache.insert(
            id.to_string(),
            LogRecord {
                status: OperationStatus::Pending,
                data: operation.clone(),
            },
        );
        self.persist()
    }

    /// Change the status of an existing record; unknown ids are ignored
    pub fn update_status(&mut self, id: &str, status: OperationStatus) -> OperationLogResult<()> {
        match self.cache.get_mut(id) {
            Some(record) => {
                record.status = status;
                self.persist()
            }
            None => {
                debug!("Status update for unknown operation {}", id);
                Ok(())
            }
        }
    }

    /// Operations still marked pending
    pub fn get_pending(&self) -> Vec<PendingOperation> {
        self.cache
            .iter()
            .filter(|(_, record)| record.status == OperationStatus::Pending)
            .map(|(id, record)| PendingOperation {
                id: id.clone(),
                data: record.data.clone(),
            })
            .collect()
    }

    /// Look up one record
    pub fn get(&self, id: &str) -> Option<&LogRecord> {
        self.cache.get(id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the log has no records
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every record and remove the backing file
    pub fn clear(&mut self) -> OperationLogResult<()> {
        self.cache.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OperationLogError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Rewrite the whole file from the cache
    ///
    /// Written to a sibling temp file and renamed so a crash mid-write
    /// leaves the previous contents readable.
    fn persist(&self) -> OperationLogResult<()> {
        let io_error = |source| OperationLogError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let text = serde_json::to_string_pretty(&self.cache)?;
        let temp = paths::temp_path(&self.path);
        std::fs::write(&temp, text).map_err(io_error)?;
        std::fs::rename(&temp, &self.path).map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::operation::OperationKind;
    use tempfile::TempDir;

    fn operation(file: &str) -> Operation {
        Operation {
            kind: OperationKind::DownloadFull,
            relative_path: file.to_string(),
            target_digest: "ABCD".to_string(),
            source_digest: None,
            url: Some(format!("http://x/{}", file)),
            patch_url: None,
            reason: "Out of date".to_string(),
            size: None,
            patch_size: None,
        }
    }

    #[test]
    fn test_log_and_complete() {
        let dir = TempDir::new().unwrap();
        let mut log = OperationLog::open(dir.path().join("operations.json"));

        log.log("dl_0", &operation("a")).unwrap();
        log.log("dl_1", &operation("b")).unwrap();
        log.update_status("dl_0", OperationStatus::Completed).unwrap();

        let pending = log.get_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "dl_1");
        assert_eq!(pending[0].data.relative_path, "b");
    }

    #[test]
    fn test_reopen_restores_exact_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("operations.json");
        {
            let mut log = OperationLog::open(&path);
            log.log("patch_0", &operation("a")).unwrap();
            log.log("patch_1", &operation("b")).unwrap();
            log.update_status("patch_1", OperationStatus::Completed).unwrap();
        }

        let reopened = OperationLog::open(&path);
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.get("patch_0").map(|r| r.status),
            Some(OperationStatus::Pending)
        );
        assert_eq!(
            reopened.get("patch_1").map(|r| r.status),
            Some(OperationStatus::Completed)
        );
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("operations.json");
        let mut log = OperationLog::open(&path);
        log.log("dl_0", &operation("f.txt")).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["dl_0"]["status"], "pending");
        assert_eq!(json["dl_0"]["data"]["file"], "f.txt");
        assert_eq!(json["dl_0"]["data"]["type"], "download_full");
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("operations.json");
        let mut log = OperationLog::open(&path);
        log.log("dl_0", &operation("a")).unwrap();
        assert!(path.exists());

        log.clear().unwrap();
        assert!(!path.exists());
        assert!(log.is_empty());
        assert!(OperationLog::open(&path).is_empty());
    }

    #[test]
    fn test_unknown_id_update_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut log = OperationLog::open(dir.path().join("operations.json"));
        log.update_status("missing", OperationStatus::Completed).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("operations.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(OperationLog::open(&path).is_empty());
    }
}
