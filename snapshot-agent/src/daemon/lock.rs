//! Per-profile pid lock file.
//!
//! Only one run may work on a profile at a time. The lock file holds the
//! owner's pid and is published with a hard link from a fully written
//! temporary file, so it never exists empty. A lock left behind by a process
//! that no longer exists is taken over.

use crate::utils::{Result, SnapshotError};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// How long a lock without a readable pid still counts as held
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pending = pending_path(path);
        fs::write(&pending, format!("{}\n", std::process::id()))?;
        let result = Self::publish(path, &pending);
        if let Err(err) = fs::remove_file(&pending) {
            debug!("Failed to remove {}: {}", pending.display(), err);
        }
        result
    }

    fn publish(path: &Path, pending: &Path) -> Result<Self> {
        for _ in 0..3 {
            match fs::hard_link(pending, path) {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let text = match fs::read_to_string(path) {
                        Ok(text) => text,
                        Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    };
                    match text.trim().parse::<i32>() {
                        Ok(pid) if is_alive(pid) => {
                            return Err(SnapshotError::Lock(format!(
                                "another run is in progress (pid {}, lock {})",
                                pid,
                                path.display()
                            )));
                        }
                        Ok(_) => {}
                        Err(_) if is_recent(path) => {
                            return Err(SnapshotError::Lock(format!(
                                "lock {} has no readable pid yet",
                                path.display()
                            )));
                        }
                        Err(_) => {}
                    }
                    warn!("Taking over stale lock {}", path.display());
                    match fs::remove_file(path) {
                        Ok(()) => continue,
                        Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(SnapshotError::Lock(format!(
            "could not acquire lock {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!("Failed to remove lock {}: {}", self.path.display(), err);
        }
    }
}

/// Private, per-process name next to the lock
fn pending_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!(".{}.{}", name, std::process::id()))
}

/// Modified within the grace period (or of unknown age)
fn is_recent(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .map(|age| age < UNREADABLE_LOCK_GRACE)
                .unwrap_or(true)
        })
        .unwrap_or(true)
}

fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists, but owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("run/agent.pid");

        let lock = ProfileLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(lock.path())?.trim(),
            std::process::id().to_string()
        );
        assert!(matches!(
            ProfileLock::acquire(&path),
            Err(SnapshotError::Lock(_))
        ));

        drop(lock);
        assert!(!path.exists());
        assert!(ProfileLock::acquire(&path).is_ok());
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_taken_over() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("agent.pid");

        fs::write(&path, "999999999\n")?;
        let lock = ProfileLock::acquire(&path).unwrap();
        drop(lock);

        fs::write(&path, "garbage")?;
        set_age(&path, Duration::from_secs(3600))?;
        assert!(ProfileLock::acquire(&path).is_ok());
        Ok(())
    }

    #[test]
    fn test_fresh_lock_without_pid_is_held() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("agent.pid");

        // another process has just created the lock
        fs::write(&path, "")?;
        assert!(matches!(
            ProfileLock::acquire(&path),
            Err(SnapshotError::Lock(_))
        ));
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path)?, "");

        set_age(&path, Duration::from_secs(3600))?;
        let lock = ProfileLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(lock.path())?.trim(),
            std::process::id().to_string()
        );
        Ok(())
    }

    #[test]
    fn test_no_pending_file_is_left_behind() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("agent.pid");

        let lock = ProfileLock::acquire(&path).unwrap();
        assert!(ProfileLock::acquire(&path).is_err());
        let names: Vec<_> = fs::read_dir(temp_dir.path())?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        assert_eq!(names, vec![std::ffi::OsString::from("agent.pid")]);

        drop(lock);
        Ok(())
    }

    fn set_age(path: &Path, age: Duration) -> io::Result<()> {
        fs::File::options()
            .write(true)
            .open(path)?
            .set_modified(SystemTime::now() - age)
    }
}
