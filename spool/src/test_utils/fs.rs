use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::workdir::{LocalFs, WorkdirFs};

/// [`LocalFs`] with injectable failures and delays.
///
/// A locked file cannot be deleted, and neither can any directory tree that still contains
/// it, as on platforms where open files block deletion.
#[derive(Debug, Default)]
pub struct LockingFs {
    inner: LocalFs,
    locked: Mutex<HashSet<PathBuf>>,
    interrupted: Mutex<HashSet<PathBuf>>,
    removal_delay: Mutex<Duration>,
}

impl LockingFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, path: &Path) {
        self.locked().insert(path.to_path_buf());
    }

    pub fn unlock(&self, path: &Path) {
        self.locked().remove(path);
    }

    /// Makes the next recursive listing of `path` fail with [`io::ErrorKind::NotFound`], as if
    /// a nested directory vanished during the walk.
    pub fn interrupt_walk(&self, path: &Path) {
        self.interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
    }

    /// Makes every directory tree removal block the calling thread for `delay` first.
    pub fn delay_removals(&self, delay: Duration) {
        *self
            .removal_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn locked(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locked_error(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is locked", path.display()),
        )
    }
}

impl WorkdirFs for LockingFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn child_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.child_dirs(path)
    }

    fn files_recursive(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let interrupted = self
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if interrupted {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} changed during the walk", path.display()),
            ));
        }

        self.inner.files_recursive(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        if self.locked().contains(path) {
            return Err(Self::locked_error(path));
        }

        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let blocked = self
            .locked()
            .iter()
            .find(|locked| locked.starts_with(path) && locked.exists())
            .cloned();
        if let Some(locked) = blocked {
            return Err(Self::locked_error(&locked));
        }

        let delay = *self
            .removal_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.inner.remove_dir_all(path)
    }

    fn touch(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        self.inner.touch(path, mtime)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        self.inner.modified(path)
    }
}
