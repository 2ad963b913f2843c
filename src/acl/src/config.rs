//! Engine configuration

use crate::error::{AclError, Result};
use serde::{Deserialize, Serialize};

/// Access control engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Collect decision counters and latency samples
    pub enable_metrics: bool,

    /// Maximum parent levels walked when expanding inherited roles
    pub max_inheritance_depth: usize,

    /// Attempt budget for `AbilityRegistry::add_actions_with_retry`
    pub conflict_retries: usize,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            max_inheritance_depth: 64,
            conflict_retries: 3,
        }
    }
}

impl AclConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_inheritance_depth == 0 {
            return Err(AclError::Config(
                "max_inheritance_depth must be at least 1".to_string(),
            ));
        }
        if self.conflict_retries == 0 {
            return Err(AclError::Config(
                "conflict_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
