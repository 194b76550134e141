//! External `rsync` transfer tool.
//!
//! rsync is run once per include entry with `--link-dest` pointing at the
//! previous snapshot. Per-file results are read back from the itemized
//! change list on stdout and the error lines on stderr.

use super::{FileOutcome, Outcome, Transfer, TransferReport, TransferRequest};
use crate::policy::{relative_to_root, IncludeKind};
use crate::utils::{Result, SnapshotError};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Exit code for "some files could not be transferred"
const EXIT_PARTIAL: i32 = 23;
/// Exit code for "some source files vanished before they could be transferred"
const EXIT_VANISHED: i32 = 24;

#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl RsyncTransfer {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    /// Command line arguments (without the program) for a request.
    pub fn build_args(&self, request: &TransferRequest<'_>, dry_run: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--recursive",
            "--links",
            "--perms",
            "--times",
            "--delete",
            "--delete-excluded",
            "--itemize-changes",
            "--itemize-changes",
            "--out-format=%i %n",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        if dry_run {
            args.push("--dry-run".into());
        }

        if let Some(link) = request.link_path() {
            let link_dir = match request.kind {
                IncludeKind::Folder => link,
                IncludeKind::File => link.parent().map(Path::to_path_buf).unwrap_or(link),
            };
            let mut arg = OsString::from("--link-dest=");
            arg.push(link_dir);
            args.push(arg);
        }

        for pattern in request.excludes.patterns() {
            if let Some(filter) = exclude_filter(pattern, request.target) {
                args.push(format!("--exclude={}", filter).into());
            }
        }

        args.extend(self.extra_args.iter().map(OsString::from));

        let destination = request.destination_path();
        match request.kind {
            IncludeKind::Folder => {
                args.push(with_trailing_slash(request.source));
                args.push(with_trailing_slash(&destination));
            }
            IncludeKind::File => {
                args.push(request.source.into());
                args.push(destination.into());
            }
        }
        args
    }

    fn run(&self, request: &TransferRequest<'_>, dry_run: bool) -> Result<TransferReport> {
        if !dry_run {
            let destination = request.destination_path();
            let dir = match request.kind {
                IncludeKind::Folder => Some(destination.as_path()),
                IncludeKind::File => destination.parent(),
            };
            if let Some(dir) = dir {
                if let Err(err) = fs::create_dir_all(dir) {
                    let mut report = TransferReport::default();
                    report.push(FileOutcome::failed(
                        request.target,
                        format!("cannot create destination: {}", err),
                    ));
                    return Ok(report);
                }
            }
        }

        let args = self.build_args(request, dry_run);
        debug!("Running {} {:?}", self.program.display(), args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                SnapshotError::Transfer(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut report = parse_output(request, &stdout, &stderr);
        if !dry_run {
            mark_linked(request, &mut report);
        }

        match output.status.code() {
            Some(0) => {}
            Some(EXIT_VANISHED) => {
                warn!("Some files vanished during transfer of {}", request.target.display());
            }
            Some(EXIT_PARTIAL) => {
                if !report.has_failures() {
                    report.push(FileOutcome::failed(
                        request.target,
                        "partial transfer due to error",
                    ));
                }
            }
            Some(code) => {
                let detail = stderr.lines().last().unwrap_or_default();
                return Err(SnapshotError::Transfer(format!(
                    "{} exited with code {}: {}",
                    self.program.display(),
                    code,
                    detail
                )));
            }
            None => {
                return Err(SnapshotError::Transfer(format!(
                    "{} was terminated by a signal",
                    self.program.display()
                )));
            }
        }

        if request.stop_on_error && report.has_failures() {
            report.aborted = true;
        }
        Ok(report)
    }
}

impl Transfer for RsyncTransfer {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn transfer(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
        self.run(request, false)
    }

    fn dry_run(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
        self.run(request, true)
    }
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut arg = path.as_os_str().to_os_string();
    if !path.as_os_str().to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}

/// Translate an exclude pattern into an rsync filter for one transfer root.
///
/// Anchored patterns only apply when they point below the include root and
/// are rewritten relative to it; floating patterns are passed through.
fn exclude_filter(pattern: &str, root: &Path) -> Option<String> {
    if !pattern.starts_with('/') {
        return Some(pattern.to_string());
    }
    let relative = Path::new(pattern).strip_prefix(root).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(format!("/{}", relative.display()))
}

/// Turn rsync output into a report.
pub fn parse_output(request: &TransferRequest<'_>, stdout: &str, stderr: &str) -> TransferReport {
    let mut report = TransferReport::default();

    for line in stdout.lines() {
        if let Some((outcome, name)) = parse_itemized(line) {
            let path = logical_path(request, name);
            report.push(FileOutcome::new(path, outcome, 0));
        } else if split_itemized(line).is_none() && !line.trim().is_empty() {
            report.messages.push(line.to_string());
        }
    }

    for line in stderr.lines() {
        match parse_error_line(line) {
            Some((path, reason)) => {
                let path = match Path::new(path).strip_prefix(request.source) {
                    Ok(relative) => logical_path(request, &relative.to_string_lossy()),
                    Err(_) if Path::new(path).is_absolute() => PathBuf::from(path),
                    Err(_) => logical_path(request, path),
                };
                report.push(FileOutcome::failed(path, reason));
            }
            None if !line.trim().is_empty() => report.messages.push(line.to_string()),
            None => {}
        }
    }

    report
}

/// Reclassify unchanged files that share their inode with the link source.
///
/// Without `--hard-links`, rsync itemizes files reused through `--link-dest`
/// like files that were already present (`.f`), so both come back as
/// [`Outcome::Kept`].
pub fn mark_linked(request: &TransferRequest<'_>, report: &mut TransferReport) {
    let Some(link_dest) = request.link_dest else {
        return;
    };
    for outcome in &mut report.outcomes {
        if outcome.outcome != Outcome::Kept {
            continue;
        }
        let relative = relative_to_root(&outcome.path);
        let (Ok(copy), Ok(previous)) = (
            fs::symlink_metadata(request.destination.join(&relative)),
            fs::symlink_metadata(link_dest.join(&relative)),
        ) else {
            continue;
        };
        if copy.is_file() && copy.dev() == previous.dev() && copy.ino() == previous.ino() {
            outcome.outcome = Outcome::HardLinked;
            outcome.bytes = copy.len();
        }
    }
}

fn logical_path(request: &TransferRequest<'_>, name: &str) -> PathBuf {
    let name = name.trim_end_matches('/');
    match request.kind {
        IncludeKind::File => request.target.to_path_buf(),
        IncludeKind::Folder if name.is_empty() || name == "." => request.target.to_path_buf(),
        IncludeKind::Folder => request.target.join(name),
    }
}

/// Parse one `--itemize-changes` line (`YXcstpoguax name`).
///
/// Returns `None` for lines that carry no per-file outcome, such as
/// attribute updates on directories.
pub fn parse_itemized(line: &str) -> Option<(Outcome, &str)> {
    if let Some(rest) = line.strip_prefix("*deleting") {
        return Some((Outcome::Deleted, rest.trim_start()));
    }

    let (flags, name) = split_itemized(line)?;
    let mut chars = flags.chars();
    let update = chars.next()?;
    let file_type = chars.next()?;
    let attributes = &flags[2..];

    let outcome = match (update, file_type) {
        ('h', _) => Outcome::HardLinked,
        ('.', 'd') => return None,
        ('.', _) if attributes.chars().all(|c| c == '.' || c == ' ') => Outcome::Kept,
        ('.', _) => Outcome::Copied,
        ('<' | '>' | 'c', 'd') if attributes.starts_with('+') => Outcome::Copied,
        ('<' | '>' | 'c', 'd') => return None,
        ('<' | '>' | 'c', _) => Outcome::Copied,
        _ => return None,
    };
    Some((outcome, name))
}

/// Split an itemized line into its 11 character flag field and the name.
fn split_itemized(line: &str) -> Option<(&str, &str)> {
    if line.starts_with("*deleting") {
        return Some(("*deleting", line["*deleting".len()..].trim_start()));
    }
    let bytes = line.as_bytes();
    if bytes.len() < 13 || bytes[11] != b' ' || !line.is_char_boundary(11) {
        return None;
    }
    let flags = &line[..11];
    if !flags.is_ascii() || !matches!(bytes[0], b'<' | b'>' | b'c' | b'h' | b'.') {
        return None;
    }
    Some((flags, &line[12..]))
}

/// Parse an rsync error line such as
/// `rsync: [sender] send_files failed to open "/src/x": Permission denied (13)`.
pub fn parse_error_line(line: &str) -> Option<(&str, String)> {
    let rest = line.strip_prefix("rsync:")?;
    let start = rest.find('"')?;
    let quoted = &rest[start + 1..];
    let end = quoted.find('"')?;
    let path = &quoted[..end];

    let tail = quoted[end + 1..].trim_start_matches(':').trim();
    let reason = tail.strip_prefix("failed:").unwrap_or(tail).trim();
    let reason = if reason.is_empty() {
        rest[..start].trim().to_string()
    } else {
        reason.to_string()
    };
    Some((path, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ExcludeSet;

    fn request<'a>(excludes: &'a ExcludeSet, link: Option<&'a Path>) -> TransferRequest<'a> {
        TransferRequest {
            source: Path::new("/home/me"),
            target: Path::new("/home/me"),
            kind: IncludeKind::Folder,
            destination: Path::new("/snap/new_snapshot/backup"),
            link_dest: link,
            excludes,
            stop_on_error: false,
        }
    }

    #[test]
    fn test_build_args_for_folder() {
        let excludes = ExcludeSet::new(["*.tmp", "/home/me/cache", "/var/log"]).unwrap();
        let link = Path::new("/snap/20240101-120000-123/backup");
        let transfer = RsyncTransfer::new("rsync", vec!["--one-file-system".to_string()]);

        let args = transfer.build_args(&request(&excludes, Some(link)), false);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert!(args.contains(&"--delete-excluded".to_string()));
        assert!(args.contains(&"--link-dest=/snap/20240101-120000-123/backup/home/me".to_string()));
        assert!(args.contains(&"--exclude=*.tmp".to_string()));
        assert!(args.contains(&"--exclude=/cache".to_string()));
        assert!(!args.iter().any(|a| a.contains("/var/log")));
        assert!(!args.contains(&"--dry-run".to_string()));
        assert_eq!(args[args.len() - 3], "--one-file-system");
        assert_eq!(args[args.len() - 2], "/home/me/");
        assert_eq!(args[args.len() - 1], "/snap/new_snapshot/backup/home/me/");
    }

    #[test]
    fn test_build_args_for_file_links_parent() {
        let excludes = ExcludeSet::empty();
        let link = Path::new("/snap/old/backup");
        let file_request = TransferRequest {
            source: Path::new("/etc/hosts"),
            target: Path::new("/etc/hosts"),
            kind: IncludeKind::File,
            ..request(&excludes, Some(link))
        };

        let args = RsyncTransfer::new("rsync", Vec::new()).build_args(&file_request, true);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert!(args.contains(&"--dry-run".to_string()));
        assert!(args.contains(&"--link-dest=/snap/old/backup/etc".to_string()));
        assert_eq!(args[args.len() - 2], "/etc/hosts");
        assert_eq!(args[args.len() - 1], "/snap/new_snapshot/backup/etc/hosts");
    }

    #[test]
    fn test_parse_itemized_lines() {
        assert_eq!(
            parse_itemized(">f+++++++++ foo/bar/baz"),
            Some((Outcome::Copied, "foo/bar/baz"))
        );
        assert_eq!(
            parse_itemized("hf          test"),
            Some((Outcome::HardLinked, "test"))
        );
        assert_eq!(
            parse_itemized(".f          file with spaces"),
            Some((Outcome::Kept, "file with spaces"))
        );
        assert_eq!(
            parse_itemized("*deleting   old/file"),
            Some((Outcome::Deleted, "old/file"))
        );
        assert_eq!(
            parse_itemized("cd+++++++++ foo/"),
            Some((Outcome::Copied, "foo/"))
        );
        assert_eq!(parse_itemized(".d..t...... foo/"), None);
        assert_eq!(parse_itemized("sending incremental file list"), None);
    }

    #[test]
    fn test_unchanged_files_sharing_an_inode_count_as_linked() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let previous = temp_dir.path().join("previous");
        let staging = temp_dir.path().join("staging");
        for root in [&previous, &staging] {
            fs::create_dir_all(root.join("home/me")).unwrap();
        }
        fs::write(previous.join("home/me/linked"), "same").unwrap();
        fs::hard_link(previous.join("home/me/linked"), staging.join("home/me/linked")).unwrap();
        fs::write(previous.join("home/me/resumed"), "same").unwrap();
        fs::write(staging.join("home/me/resumed"), "same").unwrap();

        let excludes = ExcludeSet::empty();
        let req = TransferRequest {
            destination: staging.as_path(),
            ..request(&excludes, Some(previous.as_path()))
        };
        let mut report = parse_output(
            &req,
            ".f          linked\n.f          resumed\n>f+++++++++ new\n",
            "",
        );
        mark_linked(&req, &mut report);

        assert_eq!(
            report.outcomes,
            vec![
                FileOutcome::new("/home/me/linked", Outcome::HardLinked, 4),
                FileOutcome::new("/home/me/resumed", Outcome::Kept, 0),
                FileOutcome::new("/home/me/new", Outcome::Copied, 0),
            ]
        );
    }

    #[test]
    fn test_parse_error_lines() {
        assert_eq!(
            parse_error_line(
                "rsync: [sender] send_files failed to open \"/home/me/test\": Permission denied (13)"
            ),
            Some(("/home/me/test", "Permission denied (13)".to_string()))
        );
        assert_eq!(
            parse_error_line("rsync: link_stat \"/home/missing\" failed: No such file or directory (2)"),
            Some(("/home/missing", "No such file or directory (2)".to_string()))
        );
        assert_eq!(
            parse_error_line("rsync error: some files/attrs were not transferred (code 23)"),
            None
        );
    }

    #[test]
    fn test_parse_output_maps_logical_paths() {
        let excludes = ExcludeSet::empty();
        let req = TransferRequest {
            source: Path::new("/mnt/remote/home/me"),
            ..request(&excludes, None)
        };
        let report = parse_output(
            &req,
            ">f+++++++++ docs/a.txt\n.d          ./\n",
            "rsync: [sender] send_files failed to open \"/mnt/remote/home/me/secret\": Permission denied (13)\n\
             rsync error: some files/attrs were not transferred (code 23)\n",
        );

        assert_eq!(
            report.outcomes,
            vec![
                FileOutcome::new("/home/me/docs/a.txt", Outcome::Copied, 0),
                FileOutcome::failed("/home/me/secret", "Permission denied (13)"),
            ]
        );
        assert_eq!(report.messages.len(), 1);
    }
}
