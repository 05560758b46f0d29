//! Restore point archives
//!
//! A restore point is a deflate zip of selected files under the content
//! root, stored under `<app_data>/backups` as `<prefix>_<YYYYMMDD_HHMMSS>.zip`
//! with entries at their original relative paths. The public operations
//! report failure as `None`/`false`; the cause is logged.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::app::paths;
use crate::constants::files;
use crate::errors::{BackupError, BackupResult};

/// Creates, lists and restores restore points for one content root
#[derive(Debug, Clone)]
pub struct BackupManager {
    content_root: PathBuf,
    backup_dir: PathBuf,
    prefix: String,
}

impl BackupManager {
    /// Manager storing archives under `<app_data_dir>/backups`
    pub fn new(content_root: impl Into<PathBuf>, app_data_dir: &Path) -> Self {
        Self {
            content_root: content_root.into(),
            backup_dir: app_data_dir.join(files::BACKUPS_DIR),
            prefix: files::RESTORE_POINT_PREFIX.to_string(),
        }
    }

    /// Use a different archive name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Archive the existing files among `relative_paths`
    ///
    /// Missing files are skipped.
    ///
    /// # Arguments
    ///
    /// * `relative_paths` - Files to archive, relative to the content root
    ///
    /// # Returns
    ///
    /// The archive name, or `None` if the archive could not be written
    /// (including a permission failure on any source file). A partially
    /// written archive is removed first, so it never shows up in
    /// [`list_restore_points`](Self::list_restore_points).
    pub fn create_restore_point<S: AsRef<str>>(&self, relative_paths: &[S]) -> Option<String> {
        if let Err(e) = std::fs::create_dir_all(&self.backup_dir) {
            warn!(
                "Cannot create backup directory {}: {}",
                self.backup_dir.display(),
                e
            );
            return None;
        }

        let name = self.next_archive_name();
        let archive_path = self.backup_dir.join(&name);

        match self.write_archive(&archive_path, relative_paths) {
            Ok(count) => {
                info!("Created restore point {} with {} files", name, count);
                Some(name)
            }
            Err(e) => {
                if is_permission_error(&e) {
                    warn!("Permission denied creating restore point {}: {}", name, e);
                } else {
                    warn!("Failed to create restore point {}: {}", name, e);
                }
                if let Err(e) = std::fs::remove_file(&archive_path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(
                            "Could not remove partial archive {}: {}",
                            archive_path.display(),
                            e
                        );
                    }
                }
                None
            }
        }
    }

    /// Names of the archives in the backup directory, sorted
    pub fn list_restore_points(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(files::ARCHIVE_EXTENSION)
            })
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    /// Extract a restore point over the content root
    ///
    /// `restore_point` is an archive name in the backup directory or an
    /// absolute path to an existing archive. Returns `false` if the archive
    /// does not exist or cannot be extracted.
    pub fn restore(&self, restore_point: &str) -> bool {
        let result = self
            .locate(restore_point)
            .and_then(|archive| self.extract(&archive));
        match result {
            Ok(count) => {
                info!("Restored {} files from {}", count, restore_point);
                true
            }
            Err(e) => {
                warn!("Restore from {} failed: {}", restore_point, e);
                false
            }
        }
    }

    fn next_archive_name(&self) -> String {
        let stamp = Local::now().format(files::RESTORE_POINT_TIMESTAMP_FORMAT);
        let base = format!("{}_{}", self.prefix, stamp);
        let mut name = format!("{}.{}", base, files::ARCHIVE_EXTENSION);
        let mut n = 1;
        while self.backup_dir.join(&name).exists() {
            name = format!("{}_{}.{}", base, n, files::ARCHIVE_EXTENSION);
            n += 1;
        }
        name
    }

    fn write_archive<S: AsRef<str>>(
        &self,
        archive_path: &Path,
        relative_paths: &[S],
    ) -> BackupResult<usize> {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(archive_path)?));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut count = 0;
        for relative in relative_paths {
            let relative = relative.as_ref();
            let source = paths::content_path(&self.content_root, relative);
            if !source.is_file() {
                debug!("Skipping missing file {}", relative);
                continue;
            }
            writer.start_file(entry_name(relative), options)?;
            io::copy(&mut File::open(&source)?, &mut writer)?;
            count += 1;
        }

        writer.finish()?.flush()?;
        Ok(count)
    }

    fn locate(&self, restore_point: &str) -> BackupResult<PathBuf> {
        let candidate = Path::new(restore_point);
        if candidate.is_absolute() {
            if candidate.is_file() {
                return Ok(candidate.to_path_buf());
            }
            return Err(BackupError::NotFound {
                name: restore_point.to_string(),
            });
        }

        // Bare names only; no walking out of the backup directory
        let is_bare = candidate.file_name().map(|n| n == candidate.as_os_str()) == Some(true);
        let path = self.backup_dir.join(candidate);
        if is_bare && path.is_file() {
            Ok(path)
        } else {
            Err(BackupError::NotFound {
                name: restore_point.to_string(),
            })
        }
    }

    fn extract(&self, archive_path: &Path) -> BackupResult<usize> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
        let mut count = 0;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let relative = match entry.enclosed_name() {
                Some(name) if paths::is_contained(name) => name.to_path_buf(),
                _ => {
                    return Err(BackupError::UnsafePath {
                        entry: entry.name().to_string(),
                    })
                }
            };
            let destination = self.content_root.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&destination)?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            io::copy(&mut entry, &mut File::create(&destination)?)?;
            count += 1;
        }

        Ok(count)
    }
}

/// Archive entries always use forward slashes
fn entry_name(relative: &str) -> String {
    relative
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

fn is_permission_error(error: &BackupError) -> bool {
    match error {
        BackupError::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
        BackupError::Archive(zip::result::ZipError::Io(e)) => {
            e.kind() == io::ErrorKind::PermissionDenied
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, BackupManager) {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let manager = BackupManager::new(root.path(), data.path());
        (root, data, manager)
    }

    #[test]
    fn test_round_trip_restores_deleted_files() {
        let (root, _data, manager) = setup();
        std::fs::create_dir_all(root.path().join("Data")).unwrap();
        std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.path().join("Data/b.bin"), b"beta").unwrap();

        let name = manager
            .create_restore_point(&["a.txt", "Data/b.bin"])
            .unwrap();
        assert!(name.starts_with("AutoPatch_Pre_"));
        assert!(name.ends_with(".zip"));

        std::fs::remove_file(root.path().join("a.txt")).unwrap();
        std::fs::remove_file(root.path().join("Data/b.bin")).unwrap();

        assert!(manager.restore(&name));
        assert_eq!(std::fs::read(root.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(root.path().join("Data/b.bin")).unwrap(), b"beta");
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let (root, _data, manager) = setup();
        std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();

        let name = manager
            .create_restore_point(&["a.txt", "not-there.txt"])
            .unwrap();
        let archive = ZipArchive::new(File::open(manager.backup_dir().join(&name)).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_restore_unknown_name_is_false() {
        let (_root, _data, manager) = setup();
        assert!(!manager.restore("AutoPatch_Pre_19700101_000000.zip"));
        assert!(!manager.restore("../escape.zip"));
    }

    #[test]
    fn test_restore_from_absolute_path() {
        let (root, _data, manager) = setup();
        std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();
        let name = manager.create_restore_point(&["a.txt"]).unwrap();
        let absolute = manager.backup_dir().join(&name);
        std::fs::write(root.path().join("a.txt"), b"changed").unwrap();

        assert!(manager.restore(&absolute.display().to_string()));
        assert_eq!(std::fs::read(root.path().join("a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_list_and_same_second_names() {
        let (root, _data, manager) = setup();
        assert!(manager.list_restore_points().is_empty());
        std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();

        let first = manager.create_restore_point(&["a.txt"]).unwrap();
        let second = manager.create_restore_point(&["a.txt"]).unwrap();
        assert_ne!(first, second);

        let listed = manager.list_restore_points();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&first) && listed.contains(&second));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_leaves_no_partial_archive() {
        use std::os::unix::fs::PermissionsExt;

        let (root, _data, manager) = setup();
        std::fs::write(root.path().join("a.txt"), b"alpha").unwrap();
        let locked = root.path().join("b.txt");
        std::fs::write(&locked, b"beta").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read mode 000 files, so there is no failure to observe
        if File::open(&locked).is_ok() {
            return;
        }

        assert_eq!(manager.create_restore_point(&["a.txt", "b.txt"]), None);
        assert!(manager.list_restore_points().is_empty());

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_entry_name_normalised() {
        assert_eq!(entry_name("Data\\Client.package"), "Data/Client.package");
        assert_eq!(entry_name("./a/../b.txt"), "a/b.txt");
    }
}
