//! Configuration for Floodgate rate limiters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Policy for a rate limiter.
///
/// Immutable once a limiter has been constructed from it. All fields must be
/// at least 1; [`RateLimitConfig::validate`] enforces this and every limiter
/// constructor calls it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admissible units (tokens or requests) per window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Tokens available instantly before steady-rate throttling applies
    /// (token bucket only)
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Minimum idle time, in minutes, before a per-identifier entry becomes
    /// eligible for pruning
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,

    /// Soft cap on distinct identifiers retained
    #[serde(default = "default_max_tracked_identifiers")]
    pub max_tracked_identifiers: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            window_seconds: default_window_seconds(),
            burst_size: default_burst_size(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            max_tracked_identifiers: default_max_tracked_identifiers(),
        }
    }
}

fn default_rate_limit() -> u32 {
    100
}

fn default_window_seconds() -> u64 {
    60
}

fn default_burst_size() -> u32 {
    20
}

fn default_cleanup_interval_minutes() -> u64 {
    60
}

fn default_max_tracked_identifiers() -> usize {
    10_000
}

impl RateLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimitConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            return Err(FloodgateError::Config(
                "rate_limit must be at least 1".to_string(),
            ));
        }
        if self.window_seconds == 0 {
            return Err(FloodgateError::Config(
                "window_seconds must be at least 1".to_string(),
            ));
        }
        if self.burst_size == 0 {
            return Err(FloodgateError::Config(
                "burst_size must be at least 1".to_string(),
            ));
        }
        if self.cleanup_interval_minutes == 0 {
            return Err(FloodgateError::Config(
                "cleanup_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.max_tracked_identifiers == 0 {
            return Err(FloodgateError::Config(
                "max_tracked_identifiers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// The minimum idle time before an entry is eligible for pruning.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }

    /// Steady refill rate in units per second.
    pub(crate) fn refill_rate(&self) -> f64 {
        f64::from(self.rate_limit) / self.window_seconds as f64
    }
}
