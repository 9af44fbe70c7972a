//! Engine configuration.
//!
//! `RetryPolicy` is fixed for the duration of a batch. `EngineConfig` bundles it
//! with the default "file exists" policy, which the resolver reads each time a
//! collision needs a decision.

use crate::error::{EngineError, Result};
use crate::model::FileExistsPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and circuit-breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive generic failures that trip the breaker
    pub max_consecutive_errors: u32,

    /// Attempts allowed per file before giving up on it
    pub max_retries_per_file: u32,

    /// Delay before the first retry, in milliseconds
    pub base_retry_delay_ms: u64,

    /// Upper bound for any retry delay, in milliseconds
    pub max_retry_delay_ms: u64,

    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 3,
            max_retries_per_file: 2,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 10_000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_errors == 0 {
            return Err(EngineError::invalid_input(
                "max_consecutive_errors",
                "Must be at least 1",
            ));
        }

        if self.backoff_multiplier == 0 {
            return Err(EngineError::invalid_input(
                "backoff_multiplier",
                "Must be at least 1",
            ));
        }

        if self.base_retry_delay_ms > self.max_retry_delay_ms {
            return Err(EngineError::invalid_input(
                "base_retry_delay_ms",
                format!(
                    "Must not exceed max_retry_delay_ms ({} > {})",
                    self.base_retry_delay_ms, self.max_retry_delay_ms
                ),
            ));
        }

        Ok(())
    }
}

fn default_auto_hide_delay_ms() -> u64 {
    5000
}

/// Main configuration for the transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Default handling of destination name collisions
    #[serde(default)]
    pub file_exists: FileExistsPolicy,

    /// How long the queue stays visible after every item finished
    #[serde(default = "default_auto_hide_delay_ms")]
    pub auto_hide_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            file_exists: FileExistsPolicy::default(),
            auto_hide_delay_ms: default_auto_hide_delay_ms(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()
    }

    pub fn auto_hide_delay(&self) -> Duration {
        Duration::from_millis(self.auto_hide_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_consecutive_errors, 3);
        assert_eq!(config.retry.max_retries_per_file, 2);
        assert_eq!(config.retry.base_retry_delay_ms, 1000);
        assert_eq!(config.retry.max_retry_delay_ms, 10_000);
        assert_eq!(config.retry.backoff_multiplier, 2);
        assert_eq!(config.file_exists, FileExistsPolicy::Ask);
        assert_eq!(config.auto_hide_delay(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = EngineConfig::default();
        config.retry.max_consecutive_errors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let policy = RetryPolicy {
            base_retry_delay_ms: 20_000,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
