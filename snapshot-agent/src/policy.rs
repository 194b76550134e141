//! Include/exclude normalisation and run policy.
//!
//! Exclude patterns use rsync-like glob semantics and are evaluated relative
//! to each include root:
//! - a pattern starting with `/` is anchored to the filesystem root and is
//!   matched against the absolute source path,
//! - any other pattern may match at any depth below the include root
//!   (an implicit `**/` prefix).
//!
//! A match excludes the path itself and everything beneath it.

use crate::utils::{Result, SnapshotError};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// What kind of source an include entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeKind {
    /// A directory tree, transferred recursively
    Folder,
    /// A single file
    File,
}

/// A path to back up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeEntry {
    pub path: PathBuf,
    pub kind: IncludeKind,
}

impl IncludeEntry {
    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: IncludeKind::Folder,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: IncludeKind::File,
        }
    }
}

/// Compiled exclude patterns.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    anchored: GlobSet,
    floating: GlobSet,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut normalized = Vec::new();
        let mut anchored = GlobSetBuilder::new();
        let mut floating = GlobSetBuilder::new();

        for raw in patterns {
            let pattern = raw.as_ref().trim();
            let pattern = if pattern.len() > 1 {
                pattern.trim_end_matches('/')
            } else {
                pattern
            };
            if pattern.is_empty() || !seen.insert(pattern.to_string()) {
                continue;
            }

            if pattern.starts_with('/') {
                anchored.add(compile(pattern, pattern)?);
                anchored.add(compile(pattern, &format!("{}/**", pattern))?);
            } else {
                let body = pattern.trim_start_matches("**/");
                floating.add(compile(pattern, &format!("**/{}", body))?);
                floating.add(compile(pattern, &format!("**/{}/**", body))?);
            }
            normalized.push(pattern.to_string());
        }

        Ok(Self {
            patterns: normalized,
            anchored: build(anchored)?,
            floating: build(floating)?,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            anchored: GlobSet::empty(),
            floating: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `absolute` is the logical source path, `relative` the same path
    /// relative to its include root (empty for the root itself).
    pub fn is_excluded(&self, absolute: &Path, relative: &Path) -> bool {
        if self.anchored.is_match(absolute) {
            return true;
        }
        !relative.as_os_str().is_empty() && self.floating.is_match(relative)
    }

    /// Whether an include entry as a whole is excluded.
    pub fn excludes_entry(&self, entry: &IncludeEntry) -> bool {
        match entry.kind {
            IncludeKind::Folder => self.is_excluded(&entry.path, Path::new("")),
            IncludeKind::File => {
                let name = entry.path.file_name().map(Path::new).unwrap_or(Path::new(""));
                self.is_excluded(&entry.path, name)
            }
        }
    }
}

fn compile(original: &str, glob: &str) -> Result<Glob> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(|source| SnapshotError::InvalidPattern {
            pattern: original.to_string(),
            source,
        })
}

fn build(builder: GlobSetBuilder) -> Result<GlobSet> {
    builder.build().map_err(|source| SnapshotError::InvalidPattern {
        pattern: String::new(),
        source,
    })
}

/// Effective per-run policy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub continue_on_errors: bool,
    pub force: bool,
}

/// Output of [`resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub includes: Vec<IncludeEntry>,
    pub excludes: ExcludeSet,
    pub policy: RunPolicy,
}

/// Normalise raw include/exclude input and fold in the policy flags.
///
/// Include paths must be absolute; they are normalised lexically, exact
/// duplicates are dropped (first occurrence wins) and entries that are
/// themselves excluded are removed.
pub fn resolve(
    includes: &[IncludeEntry],
    excludes: &[String],
    continue_on_errors: bool,
    force: bool,
) -> Result<ResolvedPolicy> {
    let excludes = ExcludeSet::new(excludes)?;

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(includes.len());
    for entry in includes {
        let path = normalize_path(&entry.path)?;
        let entry = IncludeEntry {
            path,
            kind: entry.kind,
        };
        if !seen.insert(entry.path.clone()) {
            continue;
        }
        if excludes.excludes_entry(&entry) {
            tracing::debug!(path = %entry.path.display(), "Include entry is excluded");
            continue;
        }
        resolved.push(entry);
    }

    Ok(ResolvedPolicy {
        includes: resolved,
        excludes,
        policy: RunPolicy {
            continue_on_errors,
            force,
        },
    })
}

/// Lexically normalise an absolute path (`.`/`..` removed, no trailing slash).
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(SnapshotError::InvalidInclude(format!(
            "{} is not an absolute path",
            path.display()
        )));
    }

    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}

/// Location of `absolute` below a backup subtree: the path with its root
/// component stripped.
pub fn relative_to_root(absolute: &Path) -> PathBuf {
    absolute
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
