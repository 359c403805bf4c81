//! Token bucket rate limiting algorithm.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

use super::status::RateLimitStatus;
use crate::config::RateLimitConfig;
use crate::error::{FloodgateError, Result};

/// Per-identifier bucket state.
#[derive(Debug, Clone)]
struct BucketState {
    /// Current token balance; always within `0.0..=rate_limit`
    tokens: f64,
    /// When the balance was last brought up to date
    last_refill: Instant,
}

/// Tracked buckets plus the cleanup timestamp, guarded together so an
/// opportunistic sweep runs inside the same critical section as the call
/// that triggered it.
struct BucketTable {
    buckets: HashMap<String, BucketState>,
    last_cleanup: Instant,
}

/// Token bucket rate limiter.
///
/// Each identifier owns a pool of tokens that refills continuously at
/// `rate_limit / window_seconds` tokens per second, capped at `rate_limit`.
/// A fresh identifier starts with `burst_size` tokens, so short bursts are
/// admitted immediately before steady-rate throttling applies.
///
/// This struct is thread-safe and can be shared across threads.
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    state: Mutex<BucketTable>,
}

impl TokenBucketLimiter {
    /// Create a new limiter, validating the configuration.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Construct from a configuration already known to be valid.
    pub(crate) fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketTable {
                buckets: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Initial fill for a fresh bucket, clamped so the balance never starts
    /// above the refill cap.
    fn initial_tokens(&self) -> f64 {
        f64::from(self.config.burst_size.min(self.config.rate_limit))
    }

    /// Consume one token for an identifier.
    pub fn try_consume(&self, identifier: &str) -> RateLimitStatus {
        self.consume_inner(identifier, 1, Instant::now())
    }

    /// Consume `cost` tokens for an identifier.
    ///
    /// Fails with [`FloodgateError::ZeroCost`] if `cost` is zero.
    pub fn try_consume_n(&self, identifier: &str, cost: u32) -> Result<RateLimitStatus> {
        self.try_consume_at(identifier, cost, Instant::now())
    }

    /// Explicit-clock variant of [`Self::try_consume_n`] for deterministic
    /// tests and simulation. `now` is expected to be monotonically
    /// non-decreasing across calls; an earlier instant is treated as no
    /// elapsed time.
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
        let refill_rate = self.config.refill_rate();
        let initial = self.initial_tokens();
        let mut state = self.state.lock();

        trace!(identifier, cost, "Checking token bucket");

        let bucket = state
            .buckets
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(identifier, tokens = initial, "Creating new bucket");
                BucketState {
                    tokens: initial,
                    last_refill: now,
                }
            });

        // Refill from elapsed wall-clock time, capped at the limit.
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * refill_rate).min(f64::from(self.config.rate_limit));
        bucket.last_refill = now;

        let status = if bucket.tokens >= f64::from(cost) {
            bucket.tokens -= f64::from(cost);
            RateLimitStatus::allowed(
                bucket.tokens as u32,
                self.config.rate_limit,
                self.config.window_seconds,
            )
        } else {
            debug!(identifier, "Rate limit exceeded");
            let deficit = f64::from(cost) - bucket.tokens;
            let retry_after = (deficit / refill_rate).ceil() as u64;
            RateLimitStatus::denied(
                0,
                self.config.rate_limit,
                self.config.window_seconds,
                Some(retry_after),
            )
        };

        if now.saturating_duration_since(state.last_cleanup) >= self.config.cleanup_interval() {
            Self::sweep(&mut state, &self.config, now);
        }

        status
    }

    /// Current status for an identifier without consuming tokens.
    pub fn status(&self, identifier: &str) -> RateLimitStatus {
        self.status_at(identifier, Instant::now())
    }

    /// Read-only projection: computes the refilled balance as of `now`
    /// without persisting it. Never reports a denial. An identifier that has
    /// never been seen reports its freshly-initialized capacity.
    pub fn status_at(&self, identifier: &str, now: Instant) -> RateLimitStatus {
        let state = self.state.lock();
        let limit = self.config.rate_limit;

        match state.buckets.get(identifier) {
            None => RateLimitStatus::allowed(
                self.config.burst_size.min(limit),
                limit,
                self.config.window_seconds,
            ),
            Some(bucket) => {
                let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
                let projected =
                    (bucket.tokens + elapsed * self.config.refill_rate()).min(f64::from(limit));
                RateLimitStatus::allowed(projected as u32, limit, self.config.window_seconds)
            }
        }
    }

    /// Remove the entry for an identifier. The next access recreates it at
    /// full initial capacity. A no-op for identifiers never seen.
    pub fn reset(&self, identifier: &str) {
        self.state.lock().buckets.remove(identifier);
    }

    /// Drop all tracked identifiers.
    pub fn clear(&self) {
        self.state.lock().buckets.clear();
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Sweep idle entries immediately.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    /// Sweep idle entries using `now` as the reference time.
    pub fn cleanup_at(&self, now: Instant) {
        let mut state = self.state.lock();
        Self::sweep(&mut state, &self.config, now);
    }

    /// Remove every entry idle longer than the cleanup interval, then evict
    /// oldest-idle entries until the map is back at the identifier cap.
    fn sweep(state: &mut BucketTable, config: &RateLimitConfig, now: Instant) {
        let idle_cutoff = config.cleanup_interval();
        let before = state.buckets.len();

        state
            .buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= idle_cutoff);

        if state.buckets.len() > config.max_tracked_identifiers {
            let excess = state.buckets.len() - config.max_tracked_identifiers;
            let mut by_idle: Vec<(String, Instant)> = state
                .buckets
                .iter()
                .map(|(id, bucket)| (id.clone(), bucket.last_refill))
                .collect();
            by_idle.sort_by_key(|&(_, last_refill)| last_refill);
            for (id, _) in by_idle.into_iter().take(excess) {
                state.buckets.remove(&id);
            }
        }

        let removed = before - state.buckets.len();
        if removed > 0 {
            debug!(removed, remaining = state.buckets.len(), "Pruned idle buckets");
        }
        state.last_cleanup = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            rate_limit: 100,
            window_seconds: 60,
            burst_size: 20,
            cleanup_interval_minutes: 60,
            max_tracked_identifiers: 10_000,
        }
    }

    fn limiter() -> TokenBucketLimiter {
        TokenBucketLimiter::new(test_config()).unwrap()
    }

    #[test]
    fn test_burst_admission() {
        let limiter = limiter();
        let now = Instant::now();

        for i in 0..20 {
            let status = limiter.try_consume_at("user", 1, now).unwrap();
            assert!(status.allowed, "call {} should be admitted", i + 1);
        }

        let status = limiter.try_consume_at("user", 1, now).unwrap();
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
        assert!(status.retry_after_seconds.unwrap() > 0);
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("user", 20, now).unwrap();
        assert!(!limiter.try_consume_at("user", 1, now).unwrap().allowed);

        // 100 tokens per 60s window: 700ms refills a bit over one token.
        let later = now + Duration::from_millis(700);
        assert!(limiter.try_consume_at("user", 1, later).unwrap().allowed);
    }

    #[test]
    fn test_tokens_cap_at_rate_limit() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("user", 1, now).unwrap();

        // An hour idle refills far more than the cap allows.
        let later = now + Duration::from_secs(3600);
        let status = limiter.status_at("user", later);
        assert_eq!(status.remaining, 100);

        let status = limiter.try_consume_at("user", 1, later).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 99);
    }

    #[test]
    fn test_per_identifier_isolation() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("a", 20, now).unwrap();
        assert!(!limiter.try_consume_at("a", 1, now).unwrap().allowed);

        let status = limiter.try_consume_at("b", 1, now).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 19);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("user", 20, now).unwrap();
        assert!(!limiter.try_consume_at("user", 1, now).unwrap().allowed);

        limiter.reset("user");

        let status = limiter.try_consume_at("user", 1, now).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 19);
    }

    #[test]
    fn test_reset_unknown_identifier_is_noop() {
        let limiter = limiter();
        limiter.reset("never-seen");
        assert_eq!(limiter.tracked_count(), 0);
    }

    #[test]
    fn test_status_does_not_consume() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("user", 3, now).unwrap();

        let first = limiter.status_at("user", now);
        let second = limiter.status_at("user", now);
        assert!(first.allowed);
        assert_eq!(first.remaining, 17);
        assert_eq!(first.remaining, second.remaining);
    }

    #[test]
    fn test_status_unknown_identifier_reports_initial_capacity() {
        let limiter = limiter();
        let status = limiter.status("new");
        assert!(status.allowed);
        assert_eq!(status.remaining, 20);
        assert_eq!(status.limit, 100);
        assert_eq!(status.retry_after_seconds, None);
    }

    #[test]
    fn test_zero_cost_rejected() {
        let limiter = limiter();
        let result = limiter.try_consume_n("user", 0);
        assert!(matches!(result, Err(FloodgateError::ZeroCost)));
        assert_eq!(limiter.tracked_count(), 0);
    }

    #[test]
    fn test_multi_token_consume() {
        let limiter = limiter();
        let now = Instant::now();

        let status = limiter.try_consume_at("user", 5, now).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 15);
    }

    #[test]
    fn test_denied_when_cost_exceeds_balance() {
        let limiter = limiter();
        let now = Instant::now();

        let status = limiter.try_consume_at("user", 21, now).unwrap();
        assert!(!status.allowed);
        // One token short at 100/60 tokens per second rounds up to 1s.
        assert_eq!(status.retry_after_seconds, Some(1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.rate_limit = 0;
        assert!(TokenBucketLimiter::new(config).is_err());
    }

    #[test]
    fn test_cleanup_removes_idle_entries() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("a", 1, now).unwrap();
        limiter.try_consume_at("b", 1, now).unwrap();
        assert_eq!(limiter.tracked_count(), 2);

        limiter.cleanup_at(now + Duration::from_secs(61 * 60));
        assert_eq!(limiter.tracked_count(), 0);
    }

    #[test]
    fn test_cleanup_keeps_active_entries() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("idle", 1, now).unwrap();
        limiter
            .try_consume_at("active", 1, now + Duration::from_secs(30 * 60))
            .unwrap();

        limiter.cleanup_at(now + Duration::from_secs(70 * 60));
        assert_eq!(limiter.tracked_count(), 1);

        // The surviving entry kept its spent balance.
        let status = limiter.status_at("active", now + Duration::from_secs(30 * 60));
        assert_eq!(status.remaining, 19);
    }

    #[test]
    fn test_opportunistic_cleanup_runs_during_consume() {
        let limiter = limiter();
        let now = Instant::now();

        limiter.try_consume_at("idle", 1, now).unwrap();

        // This call is more than an hour after construction, so it triggers
        // the inline sweep; the just-touched entry survives it.
        limiter
            .try_consume_at("fresh", 1, now + Duration::from_secs(61 * 60))
            .unwrap();
        assert_eq!(limiter.tracked_count(), 1);
    }

    #[test]
    fn test_cap_evicts_oldest_idle_first() {
        let mut config = test_config();
        config.max_tracked_identifiers = 2;
        let limiter = TokenBucketLimiter::new(config).unwrap();
        let now = Instant::now();

        limiter.try_consume_at("oldest", 1, now).unwrap();
        limiter
            .try_consume_at("middle", 1, now + Duration::from_secs(1))
            .unwrap();
        limiter
            .try_consume_at("newest", 1, now + Duration::from_secs(2))
            .unwrap();

        limiter.cleanup_at(now + Duration::from_secs(3));
        assert_eq!(limiter.tracked_count(), 2);

        // "middle" kept its spent balance; "oldest" was evicted and would
        // start over at full burst.
        let status = limiter.status_at("middle", now + Duration::from_secs(1));
        assert_eq!(status.remaining, 19);
        let status = limiter.status_at("oldest", now + Duration::from_secs(3));
        assert_eq!(status.remaining, 20);
    }

    #[test]
    fn test_burst_larger_than_rate_limit_is_clamped() {
        let mut config = test_config();
        config.rate_limit = 10;
        config.burst_size = 50;
        let limiter = TokenBucketLimiter::new(config).unwrap();
        let now = Instant::now();

        let status = limiter.try_consume_at("user", 1, now).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 9);
    }
}
