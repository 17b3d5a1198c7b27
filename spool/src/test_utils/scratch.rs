use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A uniquely named directory under the system temporary directory, deleted on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh, empty scratch directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    pub fn new() -> Self {
        let path = std::env::temp_dir()
            .join("spool-tests")
            .join(Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&path).expect("failed to create scratch directory");

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ScratchDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
