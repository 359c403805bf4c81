//! Sliding window rate limiting algorithm.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

use super::status::RateLimitStatus;
use crate::config::RateLimitConfig;
use crate::error::{FloodgateError, Result};

/// Per-identifier window state.
#[derive(Debug, Clone)]
struct WindowState {
    /// Timestamps of admitted requests, oldest first
    requests: Vec<Instant>,
    /// Last time a consume call touched this identifier, allowed or not
    last_seen: Instant,
}

/// Tracked windows plus the cleanup timestamp, guarded together so an
/// opportunistic sweep runs inside the same critical section as the call
/// that triggered it.
struct WindowTable {
    windows: HashMap<String, WindowState>,
    last_cleanup: Instant,
}

/// Sliding window rate limiter.
///
/// Each identifier keeps the timestamps of its admitted requests; a request
/// is allowed when the count of timestamps still inside the trailing window
/// plus its cost fits under the limit. Exact over the window, at the price of
/// storing one timestamp per admitted unit.
///
/// This struct is thread-safe and can be shared across threads.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<WindowTable>,
}

impl SlidingWindowLimiter {
    /// Create a new limiter, validating the configuration.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Construct from a configuration already known to be valid.
    pub(crate) fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WindowTable {
                windows: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Consume one unit for an identifier.
    pub fn try_consume(&self, identifier: &str) -> RateLimitStatus {
        self.consume_inner(identifier, 1, Instant::now())
    }

    /// Consume `cost` units for an identifier.
    ///
    /// Fails with [`FloodgateError::ZeroCost`] if `cost` is zero.
    pub fn try_consume_n(&self, identifier: &str, cost: u32) -> Result<RateLimitStatus> {
        self.try_consume_at(identifier, cost, Instant::now())
    }

    /// Explicit-clock variant of [`Self::try_consume_n`] for deterministic
    /// tests and simulation. `now` is expected to be monotonically
    /// non-decreasing across calls.
    pub fn try_consume_at(
        &self,
        identifier: &str,
        cost: u32,
        now: Instant,
    ) -> Result<RateLimitStatus> {
        if cost == 0 {
            return Err(FloodgateError::ZeroCost);
        }
        Ok(self.consume_inner(identifier, cost, now))
    }

    fn consume_inner(&self, identifier: &str, cost: u32, now: Instant) -> RateLimitStatus {
        let window = self.config.window();
        let limit = self.config.rate_limit;
        let mut state = self.state.lock();

        trace!(identifier, cost, "Checking sliding window");

        let entry = state
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(identifier, "Creating new window");
                WindowState {
                    requests: Vec::new(),
                    last_seen: now,
                }
            });

        entry
            .requests
            .retain(|t| now.saturating_duration_since(*t) < window);
        entry.last_seen = now;

        let count = entry.requests.len() as u64;
        let status = if count + u64::from(cost) <= u64::from(limit) {
            entry.requests.extend(std::iter::repeat(now).take(cost as usize));
            RateLimitStatus::allowed(
                limit - (count as u32 + cost),
                limit,
                self.config.window_seconds,
            )
        } else {
            debug!(identifier, "Rate limit exceeded");
            // Retry once the oldest timestamp ages out. With no timestamps
            // at all the cost exceeds the whole limit and can never succeed.
            let retry_after = entry.requests.first().map(|oldest| {
                let age = now.saturating_duration_since(*oldest);
                let until_expiry = window.saturating_sub(age);
                (until_expiry.as_secs_f64().ceil() as u64).max(1)
            });
            RateLimitStatus::denied(
                limit.saturating_sub(count as u32),
                limit,
                self.config.window_seconds,
                retry_after,
            )
        };

        if now.saturating_duration_since(state.last_cleanup) >= self.config.cleanup_interval() {
            Self::sweep(&mut state, &self.config, now);
        }

        status
    }

    /// Current status for an identifier without consuming.
    pub fn status(&self, identifier: &str) -> RateLimitStatus {
        self.status_at(identifier, Instant::now())
    }

    /// Read-only projection: counts the timestamps still inside the window
    /// as of `now` without mutating the log. Never reports a denial.
    pub fn status_at(&self, identifier: &str, now: Instant) -> RateLimitStatus {
        let state = self.state.lock();
        let window = self.config.window();
        let limit = self.config.rate_limit;

        match state.windows.get(identifier) {
            None => RateLimitStatus::allowed(limit, limit, self.config.window_seconds),
            Some(entry) => {
                let live = entry
                    .requests
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) < window)
                    .count();
                RateLimitStatus::allowed(
                    limit.saturating_sub(live as u32),
                    limit,
                    self.config.window_seconds,
                )
            }
        }
    }

    /// Remove the entry for an identifier. A no-op for identifiers never
    /// seen.
    pub fn reset(&self, identifier: &str) {
        self.state.lock().windows.remove(identifier);
    }

    /// Drop all tracked identifiers.
    pub fn clear(&self) {
        self.state.lock().windows.clear();
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Sweep expired state immediately.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    /// Sweep expired state using `now` as the reference time.
    pub fn cleanup_at(&self, now: Instant) {
        let mut state = self.state.lock();
        Self::sweep(&mut state, &self.config, now);
    }

    /// Prune every identifier's timestamp log, drop identifiers left empty,
    /// then evict oldest-idle entries until the map is back at the
    /// identifier cap. Entries with live timestamps are otherwise never
    /// removed, since that would forget admissions still inside the window.
    fn sweep(state: &mut WindowTable, config: &RateLimitConfig, now: Instant) {
        let window = config.window();
        let before = state.windows.len();

        state.windows.retain(|_, entry| {
            entry
                .requests
                .retain(|t| now.saturating_duration_since(*t) < window);
            !entry.requests.is_empty()
        });

        if state.windows.len() > config.max_tracked_identifiers {
            let excess = state.windows.len() - config.max_tracked_identifiers;
            let mut by_idle: Vec<(String, Instant)> = state
                .windows
                .iter()
                .map(|(id, entry)| (id.clone(), entry.last_seen))
                .collect();
            by_idle.sort_by_key(|&(_, last_seen)| last_seen);
            for (id, _) in by_idle.into_iter().take(excess) {
                state.windows.remove(&id);
            }
        }

        let removed = before - state.windows.len();
        if removed > 0 {
            debug!(removed, remaining = state.windows.len(), "Pruned expired windows");
        }
        state.last_cleanup = now;
    }
}
