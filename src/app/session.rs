//! Session lock sentinel
//!
//! An empty `update.lock` file under the content root. Its existence means a
//! mutation session started and did not finish cleanly. It is advisory only:
//! nothing stops a second session from running against the same root.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::files;

/// Sentinel file marking an in-progress (or interrupted) session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Lock for the given content root
    pub fn for_root(content_root: &Path) -> Self {
        Self {
            path: content_root.join(files::LOCK_FILE_NAME),
        }
    }

    /// Sentinel file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a session is in progress or was interrupted
    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Create the sentinel (and the content root, if needed)
    pub fn acquire(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"")?;
        debug!("Session lock created at {}", self.path.display());
        Ok(())
    }

    /// Remove the sentinel; releasing an absent lock is not an error
    pub fn release(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Session lock removed from {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = SessionLock::for_root(dir.path());
        assert!(!lock.is_held());

        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert_eq!(lock.path(), dir.path().join("update.lock"));
        assert_eq!(std::fs::read(lock.path()).unwrap().len(), 0);

        lock.release().unwrap();
        assert!(!lock.is_held());
        lock.release().unwrap();
    }

    #[test]
    fn test_lock_visible_to_fresh_instance() {
        let dir = TempDir::new().unwrap();
        SessionLock::for_root(dir.path()).acquire().unwrap();
        assert!(SessionLock::for_root(dir.path()).is_held());
    }
}
