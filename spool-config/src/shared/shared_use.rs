use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for coordinating concurrent use of a shared resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SharedUseConfig {
    /// Maximum time, in milliseconds, a caller waits for the first use to finish.
    ///
    /// `None` waits indefinitely, which relies on every first user eventually completing or
    /// rolling back.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

impl SharedUseConfig {
    /// Validates the shared use configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wait_timeout_ms == Some(0) {
            return Err(ValidationError::invalid(
                "shared_use.wait_timeout_ms",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}
