//! Per-path outcome listing for incremental snapshots.
//!
//! Every snapshot stores the outcomes of its transfer as `fileinfo.zst`, one
//! tab separated line per path: `<outcome>\t<bytes>\t<path>[\t<reason>]`.
//! Tabs, newlines and backslashes inside fields are escaped.

use crate::transfer::{FileOutcome, Outcome};
use crate::utils::compress::{read_compressed_text, write_compressed};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Listing format version, written as the header line.
pub const FILEINFO_VERSION: u32 = 1;

/// One parsed line of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoEntry {
    pub outcome: String,
    pub bytes: u64,
    pub path: PathBuf,
    pub reason: Option<String>,
}

pub fn render(outcomes: &[FileOutcome]) -> String {
    let mut text = format!("# fileinfo v{}\n", FILEINFO_VERSION);
    for outcome in outcomes {
        text.push_str(outcome.outcome.code());
        text.push('\t');
        text.push_str(&outcome.bytes.to_string());
        text.push('\t');
        text.push_str(&escape(&outcome.path.to_string_lossy()));
        if let Outcome::Failed(reason) = &outcome.outcome {
            text.push('\t');
            text.push_str(&escape(reason));
        }
        text.push('\n');
    }
    text
}

/// Parse a listing; malformed lines are skipped.
pub fn parse(text: &str) -> Vec<FileInfoEntry> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let outcome = fields.next()?.to_string();
            let bytes = fields.next()?.parse().ok()?;
            let path = PathBuf::from(unescape(fields.next()?));
            let reason = fields.next().map(unescape);
            Some(FileInfoEntry {
                outcome,
                bytes,
                path,
                reason,
            })
        })
        .collect()
}

pub fn write(path: &Path, outcomes: &[FileOutcome], level: i32) -> io::Result<()> {
    write_compressed(path, render(outcomes).as_bytes(), level)
}

pub fn read(path: &Path) -> io::Result<Vec<FileInfoEntry>> {
    Ok(parse(&read_compressed_text(path)?))
}

fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape(field: &str) -> String {
    let mut unescaped = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => unescaped.push('\t'),
            Some('n') => unescaped.push('\n'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_lists_every_outcome() {
        let outcomes = vec![
            FileOutcome::new("/src/file with spaces", Outcome::Copied, 6),
            FileOutcome::new("/src/foo/bar/baz", Outcome::HardLinked, 3),
            FileOutcome::failed("/src/test", "Permission denied (os error 13)"),
        ];

        let text = render(&outcomes);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# fileinfo v1");
        assert_eq!(lines[1], "copied\t6\t/src/file with spaces");
        assert_eq!(lines[2], "linked\t3\t/src/foo/bar/baz");
        assert_eq!(lines[3], "failed\t0\t/src/test\tPermission denied (os error 13)");
    }

    #[test]
    fn test_awkward_names_survive_the_listing() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("fileinfo.zst");
        let outcomes = vec![FileOutcome::new("/src/tab\there\\and\nnewline", Outcome::Copied, 1)];

        write(&path, &outcomes, 3)?;
        let entries = read(&path)?;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/src/tab\there\\and\nnewline"));
        assert_eq!(entries[0].outcome, "copied");
        assert_eq!(entries[0].reason, None);
        Ok(())
    }
}
