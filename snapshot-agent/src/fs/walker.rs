//! Directory traversal for snapshot transfers.
//!
//! [`walk_tree`] walks a source tree in file-name order, pruning excluded
//! subtrees and reporting unreadable entries as events instead of aborting,
//! so callers can record them as per-file failures.

use super::metadata::FileMetadata;
use crate::policy::ExcludeSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Report directories as well as files
    pub include_dirs: bool,
}

/// Kind of a walked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, FIFOs, device nodes
    Other,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub kind: EntryKind,

    pub metadata: FileMetadata,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> Result<Self, walkdir::Error> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type();

        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Ok(Self {
            path,
            relative_path,
            kind,
            metadata: FileMetadata::from_metadata(&metadata),
        })
    }
}

/// Something the walker ran into
#[derive(Debug)]
pub enum WalkEvent {
    Entry(FileInfo),
    /// An excluded path (relative to the root); its subtree is skipped
    Excluded(PathBuf),
    /// An entry that could not be read
    Error { relative_path: PathBuf, reason: String },
}

/// Whether the walk should go on after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

/// Walk `root` (excluding the root itself), pruning paths excluded by
/// `excludes`. Exclusion is evaluated against `logical_root` joined with the
/// relative path, so a tree presented under a mount point is matched by its
/// original location.
pub fn walk_tree<F>(
    root: &Path,
    logical_root: &Path,
    excludes: &ExcludeSet,
    mut callback: F,
) where
    F: FnMut(WalkEvent) -> WalkControl,
{
    let mut iter = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(next) = iter.next() {
        let event = match next {
            Ok(entry) => {
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if excludes.is_excluded(&logical_root.join(relative), relative) {
                    if entry.file_type().is_dir() {
                        iter.skip_current_dir();
                    }
                    WalkEvent::Excluded(relative.to_path_buf())
                } else {
                    match FileInfo::from_entry(&entry, root) {
                        Ok(info) => WalkEvent::Entry(info),
                        Err(err) => walk_error(root, err),
                    }
                }
            }
            Err(err) => walk_error(root, err),
        };

        if callback(event) == WalkControl::Stop {
            break;
        }
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> WalkEvent {
    let relative_path = err
        .path()
        .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
        .unwrap_or_default();
    let reason = err
        .io_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| err.to_string());
    WalkEvent::Error {
        relative_path,
        reason,
    }
}

/// Walk a directory tree and collect all entries, failing on the first
/// unreadable one.
pub fn walk_directory(root: &Path, options: WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name();

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() && !options.include_dirs {
            continue;
        }

        files.push(FileInfo::from_entry(&entry, root)?);
    }

    Ok(files)
}
