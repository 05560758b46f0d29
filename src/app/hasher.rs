//! Content hashing for local files
//!
//! Computes [`Digest`]s of files on disk, either one at a time or as a batch
//! spread over a bounded pool of blocking tasks. A batch never aborts because
//! one file failed: every input path gets an entry in the result map.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::app::hash::Digest;
use crate::constants::files;
use crate::errors::{HashError, HashResult};

/// Hashes local files with bounded parallelism
#[derive(Debug, Clone)]
pub struct ContentHasher {
    worker_count: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    /// Create a hasher sized to the available CPU parallelism
    pub fn new() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }

    /// Create a hasher with an explicit worker count (0 means the default)
    pub fn with_workers(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            default_worker_count()
        } else {
            worker_count
        };
        Self { worker_count }
    }

    /// Number of files hashed concurrently
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Hash a single file, streaming its content (blocking)
    ///
    /// Fails with `NotFound`, `PermissionDenied` or `Io` so callers can tell
    /// a missing file (needs a full download) from a real failure.
    pub fn hash_file(path: &Path) -> HashResult<Digest> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let mut reader = BufReader::with_capacity(files::HASH_BUFFER_SIZE, file);
        let mut context = md5::Context::new();
        let mut buffer = vec![0u8; files::HASH_BUFFER_SIZE];

        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|e| HashError::from_io(path, e))?;
            if read == 0 {
                break;
            }
            context.consume(&buffer[..read]);
        }

        Ok(Digest::from_bytes(context.compute().0))
    }

    /// Hash a single file on the blocking thread pool
    ///
    /// # Errors
    ///
    /// * `HashError::NotFound` if `path` does not exist
    /// * `HashError::PermissionDenied` if it cannot be opened for reading
    /// * `HashError::Io` for any other read failure
    pub async fn hash(&self, path: &Path) -> HashResult<Digest> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::hash_file(&owned))
            .await
            .map_err(|e| HashError::TaskFailed {
                reason: e.to_string(),
            })?
    }

    /// Hash many files, keeping the individual outcome of each
    ///
    /// `on_hashed(completed, total, path)` is called from the awaiting task
    /// as each file finishes, in completion order.
    pub async fn hash_many<F>(
        &self,
        paths: &[PathBuf],
        mut on_hashed: F,
    ) -> HashMap<PathBuf, HashResult<Digest>>
    where
        F: FnMut(usize, usize, &Path) + Send,
    {
        let total = paths.len();
        let mut results = HashMap::with_capacity(total);

        let mut hashed = stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || Self::hash_file(&task_path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(HashError::TaskFailed {
                            reason: e.to_string(),
                        })
                    });
                (path, result)
            })
            .buffer_unordered(self.worker_count);

        while let Some((path, result)) = hashed.next().await {
            match &result {
                Ok(digest) => debug!("Hashed {}: {}", path.display(), digest),
                Err(e) => warn!("Could not hash {}: {}", path.display(), e),
            }
            on_hashed(results.len() + 1, total, &path);
            results.insert(path, result);
        }

        results
    }

    /// Hash many files, mapping failures to `None`
    ///
    /// The returned map has an entry for every input path.
    pub async fn verify_many(&self, paths: &[PathBuf]) -> HashMap<PathBuf, Option<Digest>> {
        self.hash_many(paths, |_, _, _| {})
            .await
            .into_iter()
            .map(|(path, result)| (path, result.ok()))
            .collect()
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_matches_in_memory_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let digest = ContentHasher::hash_file(&path).unwrap();
        assert_eq!(digest, Digest::of_bytes(&content));
    }

    #[test]
    fn test_rehash_copy_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("a.txt");
        let copy = temp_dir.path().join("b.txt");
        std::fs::write(&original, b"stable content").unwrap();
        std::fs::copy(&original, &copy).unwrap();

        let first = ContentHasher::hash_file(&original).unwrap();
        let second = ContentHasher::hash_file(&copy).unwrap();
        assert_eq!(first.to_hex(), second.to_hex());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = ContentHasher::hash_file(&temp_dir.path().join("missing"));
        assert!(matches!(result, Err(HashError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_verify_many_keeps_every_input() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("present.txt");
        let missing = temp_dir.path().join("missing.txt");
        std::fs::write(&present, b"here").unwrap();

        let hasher = ContentHasher::with_workers(2);
        let results = hasher
            .verify_many(&[present.clone(), missing.clone()])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[&present], Some(Digest::of_bytes(b"here")));
        assert_eq!(results[&missing], None);
    }

    #[tokio::test]
    async fn test_hash_many_reports_progress() {
        let temp_dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| {
                let path = temp_dir.path().join(format!("f{}.txt", i));
                std::fs::write(&path, format!("file {}", i)).unwrap();
                path
            })
            .collect();

        let mut seen = Vec::new();
        let results = ContentHasher::with_workers(3)
            .hash_many(&paths, |current, total, _| seen.push((current, total)))
            .await;

        assert_eq!(results.len(), 5);
        assert_eq!(seen.last(), Some(&(5, 5)));
        assert!(results.values().all(|r| r.is_ok()));
    }

    #[test]
    fn test_zero_workers_uses_default() {
        assert!(ContentHasher::with_workers(0).worker_count() >= 1);
        assert_eq!(ContentHasher::with_workers(3).worker_count(), 3);
    }
}
