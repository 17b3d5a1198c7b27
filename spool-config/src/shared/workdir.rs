//! Working directory lifecycle configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for the working directory manager.
///
/// Registered directories get their liveness marker refreshed every heartbeat interval.
/// Unregistered directories whose marker is older than `stale_after_ms` are reclaimed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkdirConfig {
    /// Root under which working directories are created.
    ///
    /// Defaults to `spool` inside the system temporary directory.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Interval in milliseconds between heartbeat and reclamation ticks.
    ///
    /// Default: 60000 (60 seconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Marker age in milliseconds after which an unregistered directory is reclaimed.
    ///
    /// Default: 120000 (2 minutes)
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    /// File name of the liveness marker inside each working directory.
    #[serde(default = "default_marker_file_name")]
    pub marker_file_name: String,

    /// Random names tried before giving up on creating a fresh directory.
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: u32,
}

impl WorkdirConfig {
    /// Default heartbeat interval: 60 seconds.
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 60_000;

    /// Default staleness threshold: 2 minutes.
    pub const DEFAULT_STALE_AFTER_MS: u64 = 120_000;

    /// Default liveness marker file name.
    pub const DEFAULT_MARKER_FILE_NAME: &'static str = "heartbeat";

    /// Default number of random name attempts.
    pub const DEFAULT_MAX_NAME_ATTEMPTS: u32 = 1_000;

    /// Directory name used under the system temporary directory when no root is set.
    pub const DEFAULT_ROOT_DIR_NAME: &'static str = "spool";

    /// Returns the configured root or the default one under the system temporary directory.
    pub fn root_or_default(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(Self::DEFAULT_ROOT_DIR_NAME))
    }

    /// Validates the working directory configuration.
    ///
    /// The staleness threshold must exceed the heartbeat interval, otherwise live directories
    /// could look orphaned between two heartbeats.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ValidationError::invalid(
                "workdir.heartbeat_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.stale_after_ms <= self.heartbeat_interval_ms {
            return Err(ValidationError::invalid(
                "workdir.stale_after_ms",
                "must be greater than heartbeat_interval_ms",
            ));
        }

        if self.marker_file_name.is_empty()
            || self.marker_file_name.contains(['/', '\\'])
            || self.marker_file_name == "."
            || self.marker_file_name == ".."
        {
            return Err(ValidationError::invalid(
                "workdir.marker_file_name",
                "must be a plain, non-empty file name",
            ));
        }

        if self.max_name_attempts == 0 {
            return Err(ValidationError::invalid(
                "workdir.max_name_attempts",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for WorkdirConfig {
    fn default() -> Self {
        Self {
            root: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            marker_file_name: default_marker_file_name(),
            max_name_attempts: default_max_name_attempts(),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    WorkdirConfig::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_stale_after_ms() -> u64 {
    WorkdirConfig::DEFAULT_STALE_AFTER_MS
}

fn default_marker_file_name() -> String {
    WorkdirConfig::DEFAULT_MARKER_FILE_NAME.to_string()
}

fn default_max_name_attempts() -> u32 {
    WorkdirConfig::DEFAULT_MAX_NAME_ATTEMPTS
}
