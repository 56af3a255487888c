use std::{num::ParseIntError, time::Duration};

use thiserror::Error;

/// How long a single lock acquisition may wait before the operation fails
/// with a timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

pub const LOCK_TIMEOUT_ENV: &str = "TX_LEDGER_LOCK_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{var}` must be a whole number of milliseconds, got `{value}`")]
    InvalidLockTimeout {
        var: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub lock_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from an arbitrary variable source, missing
    /// variables fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(LOCK_TIMEOUT_ENV) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|source| ConfigError::InvalidLockTimeout {
                    var: LOCK_TIMEOUT_ENV,
                    value: value.clone(),
                    source,
                })?;
            config.lock_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }
}
