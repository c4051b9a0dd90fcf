//! Pool configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PoolError;

pub const ENV_WORKERS: &str = "STRAND_WORKERS";
pub const ENV_POOL_NAME: &str = "STRAND_POOL_NAME";

/// Errors reading `PoolConfig` from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric variable was not a positive integer.
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Configuration for a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker slots (max tasks running at once).
    pub workers: usize,

    /// Name used in log fields.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            name: "strand".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Read overrides from `STRAND_WORKERS` / `STRAND_POOL_NAME`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = raw
                .trim()
                .parse::<NonZeroUsize>()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: ENV_WORKERS,
                    value: raw.clone(),
                })?
                .get();
        }
        if let Some(name) = lookup(ENV_POOL_NAME) {
            config.name = name;
        }

        Ok(config)
    }

    /// Fail-fast check run by `WorkerPool::new`.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
