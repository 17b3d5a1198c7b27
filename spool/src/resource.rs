//! Shared artifacts backed by a file on disk.

use std::path::{Path, PathBuf};

use crate::bail;
use crate::concurrency::shared_use::{SharedUse, UseGuard};
use crate::error::{ErrorKind, SpoolError, SpoolResult};

/// A file whose derived form is built by its first user and reused by everyone after.
#[derive(Debug)]
pub struct SharedArtifact {
    path: PathBuf,
    coordinator: SharedUse,
}

impl SharedArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_coordinator(path, SharedUse::new())
    }

    pub fn with_coordinator(path: impl Into<PathBuf>, coordinator: SharedUse) -> Self {
        Self {
            path: path.into(),
            coordinator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn coordinator(&self) -> &SharedUse {
        &self.coordinator
    }

    /// Begins a use of the artifact.
    ///
    /// Fails with [`ErrorKind::ResourceGone`] if the backing file was deleted, otherwise waits
    /// like [`SharedUse::begin_use`]. The file is checked again once the wait is over, and the
    /// use is rolled back if it disappeared meanwhile.
    pub fn begin_use(&self) -> SpoolResult<UseGuard<'_>> {
        self.ensure_exists()?;
        let guard = self.coordinator.enter()?;
        self.ensure_exists()?;

        Ok(guard)
    }

    fn ensure_exists(&self) -> SpoolResult<()> {
        if !self.path.try_exists()? {
            bail!(
                ErrorKind::ResourceGone,
                "Shared artifact no longer exists",
                self.path.display()
            );
        }

        Ok(())
    }

    /// Runs `f` inside a use, completing it on `Ok` and rolling it back on `Err`.
    ///
    /// Errors from `f` are returned unchanged.
    pub fn with_use<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Path) -> Result<R, E>,
        E: From<SpoolError>,
    {
        let guard = self.begin_use()?;
        let value = f(&self.path)?;
        guard.complete();

        Ok(value)
    }
}
