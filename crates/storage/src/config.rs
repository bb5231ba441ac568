//! Store sizing and retention.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Capacity and TTL of one bounded store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Maximum number of entries kept (must be > 0).
    pub max_items: usize,
    /// Age in milliseconds after which an entry is stale (must be > 0).
    pub ttl_ms: u64,
}

impl StoreConfig {
    pub fn new(max_items: usize, ttl: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            max_items,
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        };
        config.validate()?;
        Ok(config)
    }

    /// Model responses: 200 entries, one day.
    pub const fn response_cache() -> Self {
        Self {
            max_items: 200,
            ttl_ms: ONE_DAY_MS,
        }
    }

    /// Dismissed jobs: 500 entries, ninety days.
    pub const fn dismissed_jobs() -> Self {
        Self {
            max_items: 500,
            ttl_ms: 90 * ONE_DAY_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::invalid("maxItems must be greater than zero"));
        }
        if self.ttl_ms == 0 {
            return Err(ConfigError::invalid("ttlMs must be greater than zero"));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub(crate) fn ttl_ms_i64(&self) -> i64 {
        i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }
}
