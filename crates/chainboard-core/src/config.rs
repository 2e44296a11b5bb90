//! Board configuration.

use crate::ledger::Checkpoint;
use crate::selection::HANDLE_TOLERANCE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Catch-up polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for a [`Board`](crate::board::Board).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub poll_interval_ms: u64,
    pub handle_tolerance: f64,
    /// Never replay history older than this checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_from: Option<Checkpoint>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            handle_tolerance: HANDLE_TOLERANCE,
            replay_from: None,
        }
    }
}

impl BoardConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.handle_tolerance.is_nan() || self.handle_tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "handle_tolerance must be non-negative, got {}",
                self.handle_tolerance
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
