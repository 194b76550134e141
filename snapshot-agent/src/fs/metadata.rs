//! File metadata used for change detection and preservation.
//!
//! A file counts as unchanged when its size, modification time and
//! permission bits are identical (the rsync "quick check").

use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::SystemTime;

/// The subset of file metadata a snapshot preserves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,

    /// Permission bits (mode & 0o7777)
    pub permissions: u32,

    /// Is this a directory?
    pub is_dir: bool,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileMetadata {
    /// Read metadata without following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            permissions: metadata.permissions().mode() & 0o7777,
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
        }
    }

    /// Quick check: same kind, size, mtime and permissions.
    pub fn is_unchanged(&self, other: &FileMetadata) -> bool {
        self.is_dir == other.is_dir
            && self.is_symlink == other.is_symlink
            && self.size == other.size
            && self.modified == other.modified
            && self.permissions == other.permissions
    }

    /// Apply modification time and permissions to a freshly copied file.
    ///
    /// The file is made owner-writable while its mtime is set, then the
    /// original mode is restored.
    pub fn apply_to_file(&self, path: &Path) -> std::io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(self.permissions | 0o600))?;
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(self.modified)?;
        drop(file);
        fs::set_permissions(path, fs::Permissions::from_mode(self.permissions))
    }

    /// Apply permissions only (directories)
    pub fn apply_permissions(&self, path: &Path) -> std::io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(self.permissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(!metadata.is_dir && !metadata.is_symlink);
        assert!(metadata.modified > SystemTime::UNIX_EPOCH);

        Ok(())
    }

    #[test]
    fn test_apply_preserves_mtime_and_mode() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("source");
        let copy = dir.path().join("copy");
        fs::write(&source, b"data")?;
        let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::OpenOptions::new().write(true).open(&source)?.set_modified(past)?;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o444))?;

        fs::copy(&source, &copy)?;
        let original = FileMetadata::from_path(&source)?;
        original.apply_to_file(&copy)?;

        let copied = FileMetadata::from_path(&copy)?;
        assert!(original.is_unchanged(&copied));
        assert_eq!(copied.permissions, 0o444);
        assert_eq!(copied.modified, past);

        Ok(())
    }

    #[test]
    fn test_size_change_is_detected() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("file");
        fs::write(&path, b"one")?;
        let before = FileMetadata::from_path(&path)?;

        fs::write(&path, b"three")?;
        let after = FileMetadata::from_path(&path)?;

        assert!(!before.is_unchanged(&after));
        Ok(())
    }
}
