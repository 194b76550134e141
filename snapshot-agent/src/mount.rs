//! Mount abstraction for snapshot sources.
//!
//! A [`Mount`] makes the include paths reachable for the duration of a run
//! and hands back a [`MountHandle`] that maps logical include paths to the
//! physical paths the transfer tool reads from.

use crate::config::{MountConfig, MountMode};
use crate::policy::relative_to_root;
use crate::utils::{Result, SnapshotError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque handle for an active mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountHandle {
    id: String,
    root: PathBuf,
}

impl MountHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            root: root.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical location of a logical (absolute) source path
    pub fn resolve(&self, logical: &Path) -> PathBuf {
        if self.root == Path::new("/") {
            logical.to_path_buf()
        } else {
            self.root.join(relative_to_root(logical))
        }
    }
}

pub trait Mount: Send + Sync {
    fn mount(&self) -> Result<MountHandle>;

    fn umount(&self, handle: &MountHandle) -> Result<()>;
}

/// Sources are read where they are
#[derive(Debug, Clone, Default)]
pub struct LocalMount;

impl Mount for LocalMount {
    fn mount(&self) -> Result<MountHandle> {
        Ok(MountHandle::new("/"))
    }

    fn umount(&self, _handle: &MountHandle) -> Result<()> {
        Ok(())
    }
}

/// Sources are read below a directory, e.g. a remote filesystem mounted
/// there by the system.
#[derive(Debug)]
pub struct DirectoryMount {
    root: PathBuf,
    active: Mutex<HashSet<String>>,
}

impl DirectoryMount {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Mutex::new(HashSet::new()),
        }
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.active
            .lock()
            .map_err(|_| SnapshotError::Mount("mount registry poisoned".into()))
    }
}

impl Mount for DirectoryMount {
    fn mount(&self) -> Result<MountHandle> {
        if !self.root.is_dir() {
            return Err(SnapshotError::Mount(format!(
                "{} is not available",
                self.root.display()
            )));
        }
        let handle = MountHandle::new(&self.root);
        self.registry()?.insert(handle.id().to_string());
        info!("Mounted {} ({})", self.root.display(), handle.id());
        Ok(handle)
    }

    fn umount(&self, handle: &MountHandle) -> Result<()> {
        if !self.registry()?.remove(handle.id()) {
            return Err(SnapshotError::Mount(format!(
                "unknown mount handle {}",
                handle.id()
            )));
        }
        debug!("Unmounted {} ({})", self.root.display(), handle.id());
        Ok(())
    }
}

/// Build the mount selected in the configuration
pub fn from_config(config: &MountConfig) -> Arc<dyn Mount> {
    match (&config.mode, &config.root) {
        (MountMode::Directory, Some(root)) => Arc::new(DirectoryMount::new(root.clone())),
        _ => Arc::new(LocalMount),
    }
}

/// Keeps a mount active and releases it when dropped.
pub(crate) struct MountGuard<'m> {
    mount: &'m dyn Mount,
    handle: MountHandle,
}

impl<'m> MountGuard<'m> {
    pub(crate) fn mount(mount: &'m dyn Mount) -> Result<Self> {
        let handle = mount.mount()?;
        Ok(Self { mount, handle })
    }

    pub(crate) fn handle(&self) -> &MountHandle {
        &self.handle
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mount.umount(&self.handle) {
            warn!("Failed to unmount {}: {}", self.handle.id(), err);
        }
    }
}
