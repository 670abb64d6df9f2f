pub mod batch;
pub mod rate_limiter;

pub use batch::{AdaptiveBatchController, BatchObservation};
pub use rate_limiter::SlidingWindowRateLimiter;
