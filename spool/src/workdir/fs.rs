//! Filesystem access used by the working directory manager.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// Filesystem operations needed to create, refresh and reclaim working directories.
///
/// Implementations must be safe to call from several threads at once. Every operation reports
/// failures as [`io::Error`]; the manager decides which ones are best-effort.
pub trait WorkdirFs: Send + Sync + 'static {
    /// Creates a directory and all of its missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates a single directory, failing with [`io::ErrorKind::AlreadyExists`] if present.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Returns `true` if the path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists the immediate subdirectories of `path`.
    fn child_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Lists every non-directory entry below `path`, at any depth.
    fn files_recursive(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates the file if missing and sets its modification time to `mtime`.
    fn touch(&self, path: &Path, mtime: SystemTime) -> io::Result<()>;

    /// Returns the modification time of a file or directory.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// [`WorkdirFs`] backed by [`std::fs`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl WorkdirFs for LocalFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn child_dirs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(fs::read_dir(path)?.filter_map(child_dir).collect())
    }

    fn files_recursive(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                // Symlinks are removed as links, never followed.
                if entry.file_type()?.is_dir() {
                    pending.push(entry.path());
                } else {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn touch(&self, path: &Path, mtime: SystemTime) -> io::Result<()> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        file.set_modified(mtime)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }
}

/// Keeps directory entries, skipping any entry that cannot be inspected.
fn child_dir(entry: io::Result<fs::DirEntry>) -> Option<PathBuf> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
            debug!(error = %err, "skipping unreadable directory entry");
            return None;
        }
    };

    match entry.file_type() {
        Ok(file_type) if file_type.is_dir() => Some(entry.path()),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %entry.path().display(), error = %err, "skipping uninspectable directory entry");
            None
        }
    }
}
