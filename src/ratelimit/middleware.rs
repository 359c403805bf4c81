//! Request-boundary adapter binding an identifier extractor to a limiter.

use std::marker::PhantomData;
use std::sync::Arc;

use super::limiter::RateLimiter;
use super::status::RateLimitStatus;

/// Binds a [`RateLimiter`] to a function that derives the caller identifier
/// from a request context.
///
/// Purely a composition convenience; the adapter carries no state of its
/// own. The call site decides the consequence of a denial (typically an HTTP
/// 429 with a `Retry-After` header taken from the status).
pub struct RateLimitMiddleware<C, F>
where
    F: Fn(&C) -> String,
{
    limiter: Arc<RateLimiter>,
    extract: F,
    _context: PhantomData<fn(&C)>,
}

impl<C, F> RateLimitMiddleware<C, F>
where
    F: Fn(&C) -> String,
{
    /// Create a middleware from a shared limiter and an extraction function.
    pub fn new(limiter: Arc<RateLimiter>, extract: F) -> Self {
        Self {
            limiter,
            extract,
            _context: PhantomData,
        }
    }

    /// Check whether the request may proceed, consuming one unit for the
    /// extracted identifier.
    pub fn check_request(&self, context: &C) -> RateLimitStatus {
        let identifier = (self.extract)(context);
        self.limiter.try_consume(&identifier)
    }

    /// The underlying limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
