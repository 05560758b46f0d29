//! Path helpers shared by the planner, patcher and executor

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::constants::files;

/// Append a suffix to the full file name (`a.package` -> `a.package.tmp`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Sibling temporary path used for in-progress writes
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, files::TEMP_FILE_SUFFIX)
}

/// Sibling path an original is held at during a swap
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, files::BACKUP_FILE_SUFFIX)
}

/// Join a manifest relative path onto a root
///
/// Manifests use `/` or `\` separators; both are accepted. Empty, `.` and
/// parent components are dropped so an entry can never point outside the
/// root.
pub fn content_path(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in relative.split(['/', '\\']) {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        path.push(part);
    }
    path
}

/// Whether a relative path stays inside whatever root it is joined to
pub fn is_contained(relative: &Path) -> bool {
    !relative.is_absolute()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_keeps_extension() {
        let path = Path::new("/game/Data/Client.package");
        assert_eq!(temp_path(path), PathBuf::from("/game/Data/Client.package.tmp"));
        assert_eq!(backup_path(path), PathBuf::from("/game/Data/Client.package.bak"));
        assert_eq!(
            with_suffix(Path::new("noext"), ".delta"),
            PathBuf::from("noext.delta")
        );
    }

    #[test]
    fn test_content_path_normalizes_separators() {
        let root = Path::new("/game");
        assert_eq!(
            content_path(root, "Game\\Bin\\TS4.exe"),
            PathBuf::from("/game/Game/Bin/TS4.exe")
        );
        assert_eq!(
            content_path(root, "../../etc/passwd"),
            PathBuf::from("/game/etc/passwd")
        );
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained(Path::new("a/b.txt")));
        assert!(!is_contained(Path::new("../b.txt")));
        assert!(!is_contained(Path::new("/abs")));
    }
}
