//! Result value returned by every admission check.

use serde::Serialize;

/// Outcome of a rate limit check.
///
/// Returned by value from every consume and status operation. `Serialize` is
/// derived so callers can render the status directly into a 429 response body
/// or rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining admissible units in the current window
    pub remaining: u32,
    /// Total limit for the window
    pub limit: u32,
    /// Seconds until the limit resets
    pub reset_in_seconds: u64,
    /// Seconds to wait before retrying; `None` unless the request was denied
    /// and a retry can ever succeed
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitStatus {
    /// Status for an allowed request with `remaining` units left.
    pub(crate) fn allowed(remaining: u32, limit: u32, reset_in_seconds: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_in_seconds,
            retry_after_seconds: None,
        }
    }

    /// Status for a denied request.
    pub(crate) fn denied(
        remaining: u32,
        limit: u32,
        reset_in_seconds: u64,
        retry_after_seconds: Option<u64>,
    ) -> Self {
        Self {
            allowed: false,
            remaining,
            limit,
            reset_in_seconds,
            retry_after_seconds,
        }
    }
}
