//! Rate limiter facade: algorithm selection, construction, and delegation.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::sliding_window::SlidingWindowLimiter;
use super::status::RateLimitStatus;
use super::token_bucket::TokenBucketLimiter;
use crate::config::RateLimitConfig;
use crate::error::Result;

/// Admission algorithm selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Continuously refilling token pool with burst allowance
    #[default]
    TokenBucket,
    /// Exact request count over a trailing time window
    SlidingWindow,
}

/// The active algorithm implementation.
///
/// Exactly one variant exists per limiter; switching algorithms replaces it
/// wholesale.
enum Backend {
    TokenBucket(TokenBucketLimiter),
    SlidingWindow(SlidingWindowLimiter),
}

impl Backend {
    fn build(config: RateLimitConfig, algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::TokenBucket => {
                Backend::TokenBucket(TokenBucketLimiter::with_config(config))
            }
            Algorithm::SlidingWindow => {
                Backend::SlidingWindow(SlidingWindowLimiter::with_config(config))
            }
        }
    }
}

/// Per-identifier rate limiter.
///
/// Owns a validated [`RateLimitConfig`] and one algorithm implementation.
/// All admission operations delegate to the active algorithm and are safe to
/// call from any thread; share the limiter via `Arc` and pass it to whatever
/// component needs admission control.
pub struct RateLimiter {
    config: RateLimitConfig,
    algorithm: Algorithm,
    backend: Backend,
}

impl RateLimiter {
    /// Create a limiter from a config and algorithm choice.
    ///
    /// Fails fast if the configuration is invalid.
    pub fn new(config: RateLimitConfig, algorithm: Algorithm) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Backend::build(config.clone(), algorithm),
            config,
            algorithm,
        })
    }

    /// Start building a limiter from the default policy.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// The active configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The active algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Consume one unit for an identifier.
    pub fn try_consume(&self, identifier: &str) -> RateLimitStatus {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.try_consume(identifier),
            Backend::SlidingWindow(limiter) => limiter.try_consume(identifier),
        }
    }

    /// Consume `cost` units for an identifier.
    ///
    /// Fails with [`crate::error::FloodgateError::ZeroCost`] if `cost` is
    /// zero.
    pub fn try_consume_n(&self, identifier: &str, cost: u32) -> Result<RateLimitStatus> {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.try_consume_n(identifier, cost),
            Backend::SlidingWindow(limiter) => limiter.try_consume_n(identifier, cost),
        }
    }

    /// Explicit-clock variant of [`Self::try_consume_n`] for deterministic
    /// tests and simulation.
    pub fn try_consume_at(
        &self,
        identifier: &str,
        cost: u32,
        now: Instant,
    ) -> Result<RateLimitStatus> {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.try_consume_at(identifier, cost, now),
            Backend::SlidingWindow(limiter) => limiter.try_consume_at(identifier, cost, now),
        }
    }

    /// Current status for an identifier without consuming.
    pub fn status(&self, identifier: &str) -> RateLimitStatus {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.status(identifier),
            Backend::SlidingWindow(limiter) => limiter.status(identifier),
        }
    }

    /// Explicit-clock variant of [`Self::status`].
    pub fn status_at(&self, identifier: &str, now: Instant) -> RateLimitStatus {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.status_at(identifier, now),
            Backend::SlidingWindow(limiter) => limiter.status_at(identifier, now),
        }
    }

    /// Remove tracked state for one identifier. A no-op for identifiers
    /// never seen.
    pub fn reset(&self, identifier: &str) {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.reset(identifier),
            Backend::SlidingWindow(limiter) => limiter.reset(identifier),
        }
    }

    /// Drop all tracked identifiers for the active algorithm.
    pub fn reset_all(&self) {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.clear(),
            Backend::SlidingWindow(limiter) => limiter.clear(),
        }
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_count(&self) -> usize {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.tracked_count(),
            Backend::SlidingWindow(limiter) => limiter.tracked_count(),
        }
    }

    /// Sweep idle and expired per-identifier state immediately. Also runs
    /// opportunistically, piggy-backed on consume calls.
    pub fn cleanup(&self) {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.cleanup(),
            Backend::SlidingWindow(limiter) => limiter.cleanup(),
        }
    }

    /// Explicit-clock variant of [`Self::cleanup`].
    pub fn cleanup_at(&self, now: Instant) {
        match &self.backend {
            Backend::TokenBucket(limiter) => limiter.cleanup_at(now),
            Backend::SlidingWindow(limiter) => limiter.cleanup_at(now),
        }
    }

    /// Switch the active algorithm.
    ///
    /// This is a destructive reconfiguration, not a migration: all tracked
    /// identifiers and their counters are discarded and the new algorithm
    /// starts empty. Requires exclusive access, so it cannot race against
    /// concurrent consumers sharing the limiter through an `Arc`.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        debug!(?algorithm, "Switching algorithm, discarding all tracked state");
        self.algorithm = algorithm;
        self.backend = Backend::build(self.config.clone(), algorithm);
    }
}

/// Fluent builder for [`RateLimiter`].
///
/// Collects an immutable policy first; the limiter is constructed once, at
/// [`RateLimiterBuilder::build`], after validation. There is no way to
/// mutate the policy of a limiter that is already in use.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterBuilder {
    config: RateLimitConfig,
    algorithm: Algorithm,
}

impl RateLimiterBuilder {
    /// Start from the default policy and algorithm.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole policy, e.g. one loaded from a file.
    pub fn config(mut self, config: RateLimitConfig) -> Self {
        self.config = config;
        self
    }

    /// Admissible units per window.
    pub fn rate_limit(mut self, rate_limit: u32) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Window length in seconds.
    pub fn window_seconds(mut self, seconds: u64) -> Self {
        self.config.window_seconds = seconds;
        self
    }

    /// Tokens available instantly (token bucket only).
    pub fn burst_size(mut self, size: u32) -> Self {
        self.config.burst_size = size;
        self
    }

    /// Minimum idle minutes before an entry is eligible for pruning.
    pub fn cleanup_interval_minutes(mut self, minutes: u64) -> Self {
        self.config.cleanup_interval_minutes = minutes;
        self
    }

    /// Soft cap on distinct identifiers retained.
    pub fn max_tracked_identifiers(mut self, count: usize) -> Self {
        self.config.max_tracked_identifiers = count;
        self
    }

    /// Admission algorithm to use.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Validate the policy and construct the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        RateLimiter::new(self.config, self.algorithm)
    }
}
