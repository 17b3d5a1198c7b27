use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{ReadAheadConfig, SharedUseConfig, ValidationError, WorkdirConfig};

/// Top-level configuration document for a spool service.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpoolConfig {
    /// Read-ahead pipeline settings.
    #[serde(default)]
    pub read_ahead: ReadAheadConfig,
    /// Shared resource use settings.
    #[serde(default)]
    pub shared_use: SharedUseConfig,
    /// Working directory lifecycle settings.
    #[serde(default)]
    pub workdir: WorkdirConfig,
}

impl SpoolConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.read_ahead.validate()?;
        self.shared_use.validate()?;
        self.workdir.validate()?;

        Ok(())
    }
}

impl Config for SpoolConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
