pub mod rate_limiter;
pub mod singer;
pub mod state;
pub mod telemetry;

pub use rate_limiter::{RateLimiter, RetryPolicy};
pub use state::{BookmarkValue, State, StateError};
