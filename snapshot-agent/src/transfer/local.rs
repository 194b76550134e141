//! Builtin transfer tool.
//!
//! Mirrors an include entry into the destination tree: unchanged files
//! already in the destination are kept, files identical to their copy in the
//! link source are hard-linked, everything else is copied with its mtime and
//! permission bits. Destination entries the source no longer has (or that
//! are now excluded) are deleted.

use super::{FileOutcome, Outcome, Transfer, TransferReport, TransferRequest};
use crate::fs::metadata::FileMetadata;
use crate::fs::remove_tree;
use crate::fs::walker::{walk_directory, walk_tree, EntryKind, WalkControl, WalkEvent, WalkOptions};
use crate::policy::IncludeKind;
use crate::utils::Result;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LocalTransfer;

impl LocalTransfer {
    pub fn new() -> Self {
        Self
    }
}

impl Transfer for LocalTransfer {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
        Ok(SyncRun::new(*request, false).run())
    }

    fn dry_run(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
        Ok(SyncRun::new(*request, true).run())
    }
}

struct SyncRun<'a> {
    request: TransferRequest<'a>,
    dry_run: bool,
    failures: usize,
    report: TransferReport,
}

impl<'a> SyncRun<'a> {
    fn new(request: TransferRequest<'a>, dry_run: bool) -> Self {
        Self {
            request,
            dry_run,
            failures: 0,
            report: TransferReport::default(),
        }
    }

    fn run(mut self) -> TransferReport {
        match self.request.kind {
            IncludeKind::Folder => self.sync_folder(),
            IncludeKind::File => self.sync_single_file(),
        }
        self.report
    }

    fn logical(&self, relative: &Path) -> PathBuf {
        if relative.as_os_str().is_empty() {
            self.request.target.to_path_buf()
        } else {
            self.request.target.join(relative)
        }
    }

    fn push(&mut self, path: &Path, outcome: Outcome, bytes: u64) {
        self.report.push(FileOutcome::new(path, outcome, bytes));
    }

    fn fail(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Transfer of {} failed: {}", path.display(), reason);
        self.failures += 1;
        self.report.push(FileOutcome::failed(path, reason));
    }

    fn sync_single_file(&mut self) {
        let request = self.request;
        let destination = request.destination_path();
        let link = request.link_path();

        let metadata = match fs::symlink_metadata(request.source) {
            Ok(metadata) => metadata,
            Err(err) => {
                self.fail(request.target, err.to_string());
                return;
            }
        };
        let kind = entry_kind(&metadata.file_type());
        if kind == EntryKind::Dir {
            self.fail(request.target, "is a directory, expected a file");
            return;
        }

        if !self.dry_run {
            if let Some(parent) = destination.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    self.fail(request.target, format!("cannot create destination: {}", err));
                    return;
                }
            }
        }

        self.sync_entry(
            request.source,
            request.target,
            &destination,
            link.as_deref(),
            kind,
            &FileMetadata::from_metadata(&metadata),
        );
    }

    fn sync_folder(&mut self) {
        let request = self.request;
        let dest_root = request.destination_path();
        let link_root = request.link_path();

        let root_metadata = match fs::metadata(request.source) {
            Ok(metadata) if metadata.is_dir() => FileMetadata::from_metadata(&metadata),
            Ok(_) => {
                self.fail(request.target, "not a directory");
                return;
            }
            Err(err) => {
                self.fail(request.target, err.to_string());
                return;
            }
        };

        let dest_existed = dest_root.is_dir();
        if !self.dry_run {
            let prepared = if dest_existed {
                make_owner_writable(&dest_root)
            } else {
                fs::create_dir_all(&dest_root)
            };
            if let Err(err) = prepared {
                self.fail(request.target, format!("cannot create destination: {}", err));
                return;
            }
        }
        if !dest_existed {
            self.push(request.target, Outcome::Copied, 0);
        } else if FileMetadata::from_path(&dest_root)
            .map(|m| m.permissions != root_metadata.permissions)
            .unwrap_or(true)
        {
            self.push(request.target, Outcome::Copied, 0);
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut dirs: Vec<(PathBuf, PathBuf, FileMetadata)> = Vec::new();

        walk_tree(
            request.source,
            request.target,
            request.excludes,
            |event| {
                match event {
                    WalkEvent::Entry(info) => {
                        let logical = self.logical(&info.relative_path);
                        let dest = dest_root.join(&info.relative_path);
                        let link = link_root.as_ref().map(|root| root.join(&info.relative_path));
                        let synced = self.sync_entry(
                            &info.path,
                            &logical,
                            &dest,
                            link.as_deref(),
                            info.kind,
                            &info.metadata,
                        );
                        if synced && info.kind == EntryKind::Dir {
                            dirs.push((logical, dest, info.metadata));
                        }
                        seen.insert(info.relative_path);
                    }
                    WalkEvent::Excluded(relative) => {
                        let logical = self.logical(&relative);
                        self.push(&logical, Outcome::Excluded, 0);
                    }
                    WalkEvent::Error {
                        relative_path,
                        reason,
                    } => {
                        let logical = self.logical(&relative_path);
                        self.fail(&logical, reason);
                        seen.insert(relative_path);
                    }
                }

                if request.stop_on_error && self.failures > 0 {
                    self.report.aborted = true;
                    WalkControl::Stop
                } else {
                    WalkControl::Continue
                }
            },
        );

        if dest_existed && !self.report.aborted {
            self.prune_extraneous(&dest_root, &seen);
        }

        if !self.dry_run {
            for (logical, dest, metadata) in dirs.iter().rev() {
                if let Err(err) = metadata.apply_permissions(dest) {
                    self.fail(logical, format!("cannot set permissions: {}", err));
                }
            }
            if let Err(err) = root_metadata.apply_permissions(&dest_root) {
                self.fail(request.target, format!("cannot set permissions: {}", err));
            }
        }
    }

    /// Returns whether the entry made it into the destination.
    fn sync_entry(
        &mut self,
        source: &Path,
        logical: &Path,
        dest: &Path,
        link: Option<&Path>,
        kind: EntryKind,
        metadata: &FileMetadata,
    ) -> bool {
        match kind {
            EntryKind::Dir => self.sync_dir(logical, dest, metadata),
            EntryKind::File => self.sync_file(source, logical, dest, link, metadata),
            EntryKind::Symlink => self.sync_symlink(source, logical, dest),
            EntryKind::Other => {
                self.report
                    .messages
                    .push(format!("skipping special file {}", logical.display()));
                false
            }
        }
    }

    fn sync_dir(&mut self, logical: &Path, dest: &Path, metadata: &FileMetadata) -> bool {
        match fs::symlink_metadata(dest) {
            Ok(existing) if existing.is_dir() => {
                if FileMetadata::from_metadata(&existing).permissions != metadata.permissions {
                    self.push(logical, Outcome::Copied, 0);
                }
                if !self.dry_run {
                    if let Err(err) = make_owner_writable(dest) {
                        self.fail(logical, err.to_string());
                        return false;
                    }
                }
                true
            }
            Ok(_) => {
                if !self.dry_run {
                    if let Err(err) = fs::remove_file(dest).and_then(|_| fs::create_dir(dest)) {
                        self.fail(logical, format!("cannot replace with directory: {}", err));
                        return false;
                    }
                }
                self.push(logical, Outcome::Copied, 0);
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !self.dry_run {
                    if let Err(err) = fs::create_dir(dest) {
                        self.fail(logical, format!("cannot create directory: {}", err));
                        return false;
                    }
                }
                self.push(logical, Outcome::Copied, 0);
                true
            }
            Err(err) => {
                self.fail(logical, err.to_string());
                false
            }
        }
    }

    fn sync_file(
        &mut self,
        source: &Path,
        logical: &Path,
        dest: &Path,
        link: Option<&Path>,
        metadata: &FileMetadata,
    ) -> bool {
        let existing = FileMetadata::from_path(dest).ok();
        if let Some(existing) = &existing {
            if existing.is_unchanged(metadata) {
                self.push(logical, Outcome::Kept, metadata.size);
                return true;
            }
        }

        let link = link.filter(|path| {
            FileMetadata::from_path(path)
                .map(|linked| linked.is_unchanged(metadata))
                .unwrap_or(false)
        });

        if self.dry_run {
            let outcome = if link.is_some() {
                Outcome::HardLinked
            } else {
                Outcome::Copied
            };
            self.push(logical, outcome, metadata.size);
            return true;
        }

        if let Some(existing) = existing {
            let removed = if existing.is_dir {
                remove_tree(dest)
            } else {
                fs::remove_file(dest)
            };
            if let Err(err) = removed {
                self.fail(logical, format!("cannot replace: {}", err));
                return false;
            }
        }

        if let Some(link) = link {
            match fs::hard_link(link, dest) {
                Ok(()) => {
                    self.push(logical, Outcome::HardLinked, metadata.size);
                    return true;
                }
                Err(err) => debug!(
                    "Hard link from {} failed, copying instead: {}",
                    link.display(),
                    err
                ),
            }
        }

        match copy_file(source, dest, metadata) {
            Ok(bytes) => {
                self.push(logical, Outcome::Copied, bytes);
                true
            }
            Err(err) => {
                let _ = fs::remove_file(dest);
                self.fail(logical, err.to_string());
                false
            }
        }
    }

    fn sync_symlink(&mut self, source: &Path, logical: &Path, dest: &Path) -> bool {
        let link_target = match fs::read_link(source) {
            Ok(target) => target,
            Err(err) => {
                self.fail(logical, err.to_string());
                return false;
            }
        };

        if let Ok(existing) = fs::symlink_metadata(dest) {
            if existing.file_type().is_symlink()
                && fs::read_link(dest).ok().as_deref() == Some(link_target.as_path())
            {
                self.push(logical, Outcome::Kept, 0);
                return true;
            }
            if !self.dry_run {
                let removed = if existing.is_dir() {
                    remove_tree(dest)
                } else {
                    fs::remove_file(dest)
                };
                if let Err(err) = removed {
                    self.fail(logical, format!("cannot replace: {}", err));
                    return false;
                }
            }
        }

        if !self.dry_run {
            if let Err(err) = symlink(&link_target, dest) {
                self.fail(logical, err.to_string());
                return false;
            }
        }
        self.push(logical, Outcome::Copied, 0);
        true
    }

    /// Delete destination entries that were not produced by this transfer.
    fn prune_extraneous(&mut self, dest_root: &Path, seen: &HashSet<PathBuf>) {
        let options = WalkOptions { include_dirs: true };
        let entries = match walk_directory(dest_root, options) {
            Ok(entries) => entries,
            Err(err) => {
                let target = self.request.target;
                self.fail(target, format!("cannot scan destination: {}", err));
                return;
            }
        };

        let mut removed: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let relative = entry.relative_path;
            if seen.contains(&relative) || removed.iter().any(|r| relative.starts_with(r)) {
                continue;
            }
            let logical = self.logical(&relative);

            if !self.dry_run {
                let result = if entry.kind == EntryKind::Dir {
                    remove_tree(&entry.path)
                } else {
                    fs::remove_file(&entry.path)
                };
                if let Err(err) = result {
                    self.fail(&logical, format!("cannot delete: {}", err));
                    removed.push(relative);
                    continue;
                }
            }
            self.push(&logical, Outcome::Deleted, 0);
            removed.push(relative);
        }
    }
}

fn entry_kind(file_type: &fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn copy_file(source: &Path, dest: &Path, metadata: &FileMetadata) -> io::Result<u64> {
    let bytes = fs::copy(source, dest)?;
    metadata.apply_to_file(dest)?;
    Ok(bytes)
}

fn make_owner_writable(path: &Path) -> io::Result<()> {
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))?;
    }
    Ok(())
}
