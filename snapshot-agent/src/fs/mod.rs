//! Filesystem helpers: tree walking and metadata.

pub mod metadata;
pub mod walker;

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Remove a directory tree that may contain read-only directories.
///
/// Directories are made owner-writable before removal. Files are left
/// untouched: they may be hard links shared with committed snapshots, and
/// changing their mode would change it there too.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.is_dir() {
        return fs::remove_file(path);
    }

    for entry in WalkDir::new(path) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("Skipping unreadable entry while unlocking tree: {}", err);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            let mode = entry.metadata().map(|m| m.permissions().mode()).unwrap_or(0);
            if mode & 0o700 != 0o700 {
                fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | 0o700))?;
            }
        }
    }

    fs::remove_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_tree_with_read_only_dirs() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let tree = temp_dir.path().join("tree");
        fs::create_dir_all(tree.join("locked/inner"))?;
        fs::write(tree.join("locked/inner/file"), b"x")?;
        fs::set_permissions(tree.join("locked/inner"), fs::Permissions::from_mode(0o555))?;
        fs::set_permissions(tree.join("locked"), fs::Permissions::from_mode(0o500))?;

        remove_tree(&tree)?;
        assert!(!tree.exists());
        Ok(())
    }

    #[test]
    fn test_remove_tree_keeps_shared_file_mode() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let shared = temp_dir.path().join("shared");
        fs::write(&shared, b"x")?;
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o444))?;

        let tree = temp_dir.path().join("tree");
        fs::create_dir(&tree)?;
        fs::hard_link(&shared, tree.join("link"))?;

        remove_tree(&tree)?;
        assert!(!tree.exists());
        assert_eq!(fs::metadata(&shared)?.permissions().mode() & 0o777, 0o444);
        Ok(())
    }

    #[test]
    fn test_remove_missing_tree_is_ok() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        remove_tree(&temp_dir.path().join("missing"))
    }
}
