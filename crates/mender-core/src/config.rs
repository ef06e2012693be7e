//! Engine configuration (TOML).
//!
//! ```toml
//! max_attempts = 3
//! tick_interval_ms = 5000
//! initial_delay_ms = 1000
//! retry_multiplier = 2.0
//! max_retry_delay_ms = 60000
//! ```
//!
//! 省略したキーは既定値になります。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Attempts allowed per step (including the first).
    pub max_attempts: u32,

    /// Cadence of routine ticks, and the base of the retry backoff.
    pub tick_interval_ms: u64,

    /// Delay between `start()` and the first tick.
    pub initial_delay_ms: u64,

    pub retry_multiplier: f64,

    pub max_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tick_interval_ms: 5_000,
            initial_delay_ms: 1_000,
            retry_multiplier: 2.0,
            max_retry_delay_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading engine config");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid("initial_delay_ms must be positive".into()));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_multiplier must be a finite number >= 1.0, got {}",
                self.retry_multiplier
            )));
        }
        if self.max_retry_delay_ms < self.tick_interval_ms {
            return Err(ConfigError::Invalid(
                "max_retry_delay_ms must not be shorter than tick_interval_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Retry policy derived from this config; backoff starts at one tick interval.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.tick_interval(),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}
