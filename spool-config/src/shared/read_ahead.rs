use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for read-ahead pipelines.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReadAheadConfig {
    /// Maximum number of produced but not yet consumed items.
    ///
    /// `None` disables backpressure and lets the producer run ahead without limit.
    #[serde(default = "default_max_ahead")]
    pub max_ahead: Option<usize>,
    /// Name given to the producer thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl ReadAheadConfig {
    /// Default look-ahead depth.
    pub const DEFAULT_MAX_AHEAD: usize = 10_000;

    /// Default producer thread name.
    pub const DEFAULT_THREAD_NAME: &'static str = "spool-read-ahead";

    /// Validates the read-ahead configuration.
    ///
    /// Ensures a bounded look-ahead is non-zero and the thread name is not empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_ahead == Some(0) {
            return Err(ValidationError::invalid(
                "read_ahead.max_ahead",
                "must be greater than 0 when set",
            ));
        }

        if self.thread_name.trim().is_empty() {
            return Err(ValidationError::invalid(
                "read_ahead.thread_name",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

impl Default for ReadAheadConfig {
    fn default() -> Self {
        Self {
            max_ahead: default_max_ahead(),
            thread_name: default_thread_name(),
        }
    }
}

fn default_max_ahead() -> Option<usize> {
    Some(ReadAheadConfig::DEFAULT_MAX_AHEAD)
}

fn default_thread_name() -> String {
    ReadAheadConfig::DEFAULT_THREAD_NAME.to_string()
}
