use std::fmt;
use std::path::Path;

/// Normalized identity of a working directory.
///
/// Two paths naming the same directory map to the same key: relative paths are made absolute,
/// trailing separators are dropped and the comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirKey(String);

impl DirKey {
    pub fn new(path: &Path) -> Self {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut key = absolute.to_string_lossy().to_lowercase();

        while key.len() > 1 && key.ends_with(['/', '\\']) {
            key.pop();
        }

        DirKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Path> for DirKey {
    fn from(path: &Path) -> Self {
        DirKey::new(path)
    }
}

impl fmt::Display for DirKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
