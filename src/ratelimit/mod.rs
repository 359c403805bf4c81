//! Rate limiting logic and state management.

mod limiter;
mod middleware;
mod sliding_window;
mod status;
mod token_bucket;

pub use limiter::{Algorithm, RateLimiter, RateLimiterBuilder};
pub use middleware::RateLimitMiddleware;
pub use sliding_window::SlidingWindowLimiter;
pub use status::RateLimitStatus;
pub use token_bucket::TokenBucketLimiter;
