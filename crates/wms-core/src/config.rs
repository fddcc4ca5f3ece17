//! # config
//!
//! why: tune retry, backoff and retention without touching the dispatcher
//! relations: consumed by record.rs when resolving attempts and by wms-queue at startup
//! what: RetryPolicy, QueueConfig, JSON settings loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Retry budget and capped exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts (including the first) before a retryable record is marked Failed
    pub max_attempts: u32,
    /// Delay after the first retryable failure (ms)
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (ms)
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Longest single delay a policy may ask for: one day (ms)
    pub const MAX_BACKOFF_MS: u64 = 24 * 60 * 60 * 1_000;

    /// Delay to wait after `attempts` attempts have failed.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1))
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.max_backoff_ms > Self::MAX_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "retry.max_backoff_ms ({}) exceeds the limit of {} ms",
                self.max_backoff_ms,
                Self::MAX_BACKOFF_MS
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Settings for one commit queue instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the commit journal
    pub data_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Reject submits once this many records are Pending or InFlight (None = unbounded)
    pub max_unresolved: Option<usize>,
    /// How long Committed records are kept for audit before purging (s)
    pub committed_retention_secs: u64,
    /// Pause before the dispatcher retries after a storage fault (ms)
    pub storage_retry_ms: u64,
    /// Pause between reachability checks while the inventory service is down (ms)
    pub offline_retry_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("commit-queue"),
            retry: RetryPolicy::default(),
            max_unresolved: None,
            committed_retention_secs: 24 * 60 * 60,
            storage_retry_ms: 1_000,
            offline_retry_ms: 5_000,
        }
    }
}

impl QueueConfig {
    /// Default settings with the journal stored under `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file. Missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: QueueConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.max_unresolved == Some(0) {
            return Err(ConfigError::Invalid("max_unresolved must be at least 1".into()));
        }
        Ok(())
    }

    pub fn storage_retry(&self) -> Duration {
        Duration::from_millis(self.storage_retry_ms)
    }

    pub fn offline_retry(&self) -> Duration {
        Duration::from_millis(self.offline_retry_ms)
    }

    pub fn committed_retention(&self) -> Duration {
        Duration::from_secs(self.committed_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn zero_attempts_uses_initial_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
    }

    #[test]
    fn exhaustion_is_inclusive() {
        let policy = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = QueueConfig {
            retry: RetryPolicy { max_attempts: 0, ..RetryPolicy::default() },
            ..QueueConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_backoff_beyond_one_day() {
        let retry = RetryPolicy {
            max_backoff_ms: RetryPolicy::MAX_BACKOFF_MS + 1,
            ..RetryPolicy::default()
        };
        assert!(matches!(retry.validate(), Err(ConfigError::Invalid(_))));

        let retry = RetryPolicy {
            max_backoff_ms: RetryPolicy::MAX_BACKOFF_MS,
            ..RetryPolicy::default()
        };
        assert!(retry.validate().is_ok());
    }
}
