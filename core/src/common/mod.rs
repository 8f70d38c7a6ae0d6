pub mod errors;
pub mod rate_limiter;

pub use errors::{ConfigError, DispatchError, PipelineError, RejectionReason, TransportError};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig};
