use crate::common::errors::ConfigError;
use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Request budget shared by every run that goes through a throttled pipeline.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a new rate limiter with specified requests per second
    pub fn new(requests_per_second: NonZeroU32) -> Self {
        Self::with_quota(Quota::per_second(requests_per_second))
    }

    /// Create a rate limiter with custom quota
    pub fn with_quota(quota: Quota) -> Self {
        Self {
            inner: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    /// Take one unit of budget, or report how long until one is available.
    pub fn check(&self) -> Result<(), RateLimitError> {
        match self.inner.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait_duration = not_until.wait_time_from(DefaultClock::default().now());
                Err(RateLimitError::TooManyRequests {
                    retry_after: wait_duration,
                })
            }
        }
    }
}

/// Rate limiting errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests { retry_after: Duration },
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Maximum burst size (defaults to requests_per_second)
    #[serde(default)]
    pub burst_size: Option<u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: None,
        }
    }
}

impl RateLimiterConfig {
    /// Create a rate limiter from this configuration
    pub fn build(&self) -> Result<RateLimiter, ConfigError> {
        let per_second = NonZeroU32::new(self.requests_per_second).ok_or_else(|| {
            ConfigError::Invalid {
                field: "throttle.requests_per_second".to_string(),
                reason: "must be greater than zero".to_string(),
            }
        })?;
        let burst = match self.burst_size {
            None => per_second,
            Some(burst) => NonZeroU32::new(burst).ok_or_else(|| ConfigError::Invalid {
                field: "throttle.burst_size".to_string(),
                reason: "must be greater than zero".to_string(),
            })?,
        };

        Ok(RateLimiter::with_quota(
            Quota::per_second(per_second).allow_burst(burst),
        ))
    }
}
