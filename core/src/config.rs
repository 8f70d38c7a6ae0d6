//! # Configuration
//!
//! Pipeline settings with serde defaults for every field, loadable from JSON
//! and overridable from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `AZMOBILE_MAX_CONCURRENCY` | `dispatcher.max_concurrency` |
//! | `AZMOBILE_WORKER_THREADS` | `dispatcher.worker_threads` |
//! | `AZMOBILE_WORKER_QUEUE_CAPACITY` | `dispatcher.worker_queue_capacity` |
//! | `AZMOBILE_RETRY_MAX_RETRIES` | `retry.max_retries` |
//! | `AZMOBILE_RETRY_DELAY_MS` | fixed delay, or exponential base delay |
//! | `AZMOBILE_RETRY_MAX_DELAY_MS` | exponential cap |

use crate::common::{ConfigError, RateLimiterConfig};
use crate::dispatcher::DEFAULT_MAX_CONCURRENCY;
use crate::policies::{RetryOptions, RetryStrategy};
use crate::utils::EnvUtils;
use serde::Deserialize;

pub const DEFAULT_WORKER_THREADS: usize = 8;

pub const ENV_MAX_CONCURRENCY: &str = "AZMOBILE_MAX_CONCURRENCY";
pub const ENV_WORKER_THREADS: &str = "AZMOBILE_WORKER_THREADS";
pub const ENV_WORKER_QUEUE_CAPACITY: &str = "AZMOBILE_WORKER_QUEUE_CAPACITY";
pub const ENV_RETRY_MAX_RETRIES: &str = "AZMOBILE_RETRY_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "AZMOBILE_RETRY_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "AZMOBILE_RETRY_MAX_DELAY_MS";

/// Sizing of the [`Dispatcher`](crate::dispatcher::Dispatcher) built by
/// [`Dispatcher::from_config`](crate::dispatcher::Dispatcher::from_config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Runs allowed to make progress at once.
    pub max_concurrency: usize,
    pub worker_threads: usize,
    /// Backlog bound for the worker pool; `None` is unbounded.
    pub worker_queue_capacity: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            worker_threads: DEFAULT_WORKER_THREADS,
            worker_queue_capacity: None,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("dispatcher.max_concurrency", "must be at least 1"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("dispatcher.worker_threads", "must be at least 1"));
        }
        if self.worker_queue_capacity == Some(0) {
            return Err(invalid(
                "dispatcher.worker_queue_capacity",
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dispatcher: DispatcherConfig,
    pub retry: RetryOptions,
    /// Client-side rate limit; no throttling when absent.
    pub throttle: Option<RateLimiterConfig>,
}

impl PipelineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Parses JSON (missing fields take their defaults) and validates it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(max) = EnvUtils::get_parsed_var(ENV_MAX_CONCURRENCY)? {
            self.dispatcher.max_concurrency = max;
        }
        if let Some(threads) = EnvUtils::get_parsed_var(ENV_WORKER_THREADS)? {
            self.dispatcher.worker_threads = threads;
        }
        if let Some(capacity) = EnvUtils::get_parsed_var(ENV_WORKER_QUEUE_CAPACITY)? {
            self.dispatcher.worker_queue_capacity = Some(capacity);
        }
        if let Some(retries) = EnvUtils::get_parsed_var(ENV_RETRY_MAX_RETRIES)? {
            self.retry.max_retries = retries;
        }

        let delay: Option<u64> = EnvUtils::get_parsed_var(ENV_RETRY_DELAY_MS)?;
        let max_delay: Option<u64> = EnvUtils::get_parsed_var(ENV_RETRY_MAX_DELAY_MS)?;
        match &mut self.retry.strategy {
            RetryStrategy::Fixed { delay_ms } => {
                if let Some(delay) = delay {
                    *delay_ms = delay;
                }
                if max_delay.is_some() {
                    log::warn!("{ENV_RETRY_MAX_DELAY_MS} ignored for a fixed retry strategy");
                }
            }
            RetryStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => {
                if let Some(delay) = delay {
                    *base_delay_ms = delay;
                }
                if let Some(max_delay) = max_delay {
                    *max_delay_ms = max_delay;
                }
            }
        }

        self.validate()?;
        log::debug!("PipelineConfig: {self:?}");
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()?;
        self.retry.validate()?;
        if let Some(throttle) = &self.throttle {
            throttle.build()?;
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
