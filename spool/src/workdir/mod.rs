//! Temporary working directories that outlive crashes without leaking.
//!
//! A [`WorkdirManager`] hands out working directories under a root and keeps a registry of the
//! ones this process owns. Each working directory contains a liveness marker file whose
//! modification time a heartbeat loop refreshes while the directory is registered. A reaper loop
//! scans the root and deletes unregistered directories whose marker went stale, which reclaims
//! directories left behind by processes that terminated without releasing them.
//!
//! Deletion is best-effort throughout: files that cannot be deleted (typically because another
//! process holds them open) are skipped and picked up again by a later reaper tick once their
//! directory's marker is stale.

mod clock;
mod fs;
mod key;
mod loops;
mod manager;

use std::path::{Path, PathBuf};

pub use clock::{Clock, SystemClock};
pub use fs::{LocalFs, WorkdirFs};
pub use key::DirKey;
pub use manager::{WorkdirLease, WorkdirManager};

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};

/// A working directory handed out by a [`WorkdirManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workdir {
    path: PathBuf,
    key: DirKey,
}

impl Workdir {
    fn new(path: PathBuf) -> Self {
        let key = DirKey::new(&path);
        Self { path, key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &DirKey {
        &self.key
    }

    /// Fails with [`ErrorKind::ResourceGone`] if the directory no longer exists.
    pub fn ensure_exists(&self) -> SpoolResult<()> {
        if !self.path.try_exists()? {
            bail!(
                ErrorKind::ResourceGone,
                "Working directory no longer exists",
                self.path.display()
            );
        }

        Ok(())
    }
}

/// Result of deleting a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Files that could not be deleted.
    pub files_failed: usize,
    /// Whether the directory itself is gone.
    pub removed: bool,
}

/// Result of one reclamation pass over a root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Child directories inspected.
    pub scanned: usize,
    /// Stale directories deleted.
    pub reaped: usize,
    /// Stale directories that could not be fully deleted.
    pub failed: usize,
}
