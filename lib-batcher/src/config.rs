//! Batcher Configuration
//!
//! Flush triggers, polling cadence and commit retry policy. The k-anonymity
//! threshold itself is not configured here: it lives in the coordinator
//! config on the ledger so every participant shares it.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use lib_coordinator::MAX_BATCH_SIZE;

use crate::error::ConfigError;

/// Backoff policy for ledger commit attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each subsequent one
    pub initial_backoff_ms: u64,
    /// Ceiling for the doubled delay
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for the accumulator and the coordinated driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    // =========================================================================
    // Flush Triggers
    // =========================================================================
    /// Queue length that flushes immediately
    pub batch_size: usize,
    /// Longest a first query waits before a partial flush
    pub max_wait_ms: u64,

    // =========================================================================
    // Ledger Coordination
    // =========================================================================
    /// Delay between batch status reads in the poll loop
    pub poll_interval_ms: u64,
    /// How many of the newest batches to scan for an open one
    pub open_batch_search_depth: u64,
    /// Commit retry policy
    pub retry: RetryConfig,

    // =========================================================================
    // Execution
    // =========================================================================
    /// Deadline for a single execution call
    pub execution_timeout_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            // Flush triggers
            batch_size: 10,
            max_wait_ms: 5_000,

            // Ledger coordination
            poll_interval_ms: 2_000,
            open_batch_search_depth: 8,
            retry: RetryConfig::default(),

            // Execution
            execution_timeout_ms: 30_000,
        }
    }
}

impl BatcherConfig {
    /// Short timings for tests
    pub fn for_testing() -> Self {
        Self {
            batch_size: 3,
            max_wait_ms: 100,
            poll_interval_ms: 50,
            open_batch_search_depth: 4,
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 40,
            },
            execution_timeout_ms: 1_000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                actual: self.batch_size,
                max: MAX_BATCH_SIZE,
            });
        }
        if self.max_wait_ms == 0 {
            return Err(ConfigError::ZeroValue("max_wait_ms"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("poll_interval_ms"));
        }
        if self.open_batch_search_depth == 0 {
            return Err(ConfigError::ZeroValue("open_batch_search_depth"));
        }
        if self.execution_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("execution_timeout_ms"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff {
                initial: self.retry.initial_backoff_ms,
                max: self.retry.max_backoff_ms,
            });
        }
        Ok(())
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batcher config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid batcher config {}", path.display()))?;
        Ok(config)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}
