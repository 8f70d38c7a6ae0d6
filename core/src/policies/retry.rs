use crate::chain::{Completer, CompletionState, PolicyChain};
use crate::common::{ConfigError, PipelineError};
use crate::http::{Headers, Request, Response};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 800;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// How long to wait before the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed { delay_ms: u64 },
    /// `base_delay_ms * 2^attempt` with jitter, capped at `max_delay_ms`.
    Exponential { base_delay_ms: u64, max_delay_ms: u64 },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryStrategy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryStrategy::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => {
                let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(32));
                let jitter = rand::thread_rng().gen_range(0.8..1.2);
                let jittered = (exponential as f64 * jitter) as u64;
                Duration::from_millis(jittered.min(max_delay_ms))
            }
        }
    }
}

/// Retry settings, deserialisable from the `retry` section of
/// [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    /// Response statuses worth another attempt.
    pub status_codes: Vec<u16>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            strategy: RetryStrategy::default(),
            status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryOptions {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
            ..Self::default()
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Exponential {
                base_delay_ms: base_delay.as_millis() as u64,
                max_delay_ms: max_delay.as_millis() as u64,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RetryStrategy::Exponential {
            base_delay_ms,
            max_delay_ms,
        } = self.strategy
        {
            if base_delay_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "retry.strategy.base_delay_ms".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if max_delay_ms < base_delay_ms {
                return Err(ConfigError::Invalid {
                    field: "retry.strategy.max_delay_ms".to_string(),
                    reason: format!("must be at least base_delay_ms ({base_delay_ms})"),
                });
            }
        }
        Ok(())
    }

    /// Delay before retry number `attempt`, or `None` when `result` is final.
    fn retry_delay(&self, result: &Result<Response, PipelineError>, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        match result {
            Ok(response) if self.status_codes.contains(&response.status()) => {
                Some(retry_after(response.headers()).unwrap_or_else(|| self.strategy.delay(attempt)))
            }
            Err(PipelineError::Transport(_)) => Some(self.strategy.delay(attempt)),
            _ => None,
        }
    }
}

/// Server-advised delay from `retry-after-ms`, `x-ms-retry-after-ms` or
/// `Retry-After` (seconds or an HTTP date).
fn retry_after(headers: &Headers) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(millis) = headers.get(name).and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_millis(millis));
        }
    }

    let value = headers.get("retry-after")?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

/// Re-sends the request when the transport fails or the service answers
/// with a transient status.
///
/// Each retry suspends the run for the computed delay, so a waiting retry
/// holds neither a worker nor a dispatcher slot. A discarded response is
/// closed before the next attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: Arc<RetryOptions>,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl Policy for RetryPolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let request = chain.request().clone();
        send_attempt(chain, Arc::clone(&self.options), 0, None, request)
    }

    fn name(&self) -> &str {
        "retry"
    }
}

fn send_attempt(
    chain: PolicyChain,
    options: Arc<RetryOptions>,
    attempt: u32,
    delay: Option<Duration>,
    request: Request,
) -> Result<(), PipelineError> {
    let interceptor = move |result: Result<Response, PipelineError>,
                            completer: Completer|
          -> Result<CompletionState, PipelineError> {
        let chain = completer.chain();
        let delay = if chain.cancellation_token().is_cancelled() {
            None
        } else {
            options.retry_delay(&result, attempt)
        };
        let Some(delay) = delay else {
            return completer.completed_with(result);
        };

        match &result {
            Ok(response) => log::debug!(
                "{}: status {} on attempt {}, retrying in {delay:?}",
                chain.run_id(),
                response.status(),
                attempt + 1
            ),
            Err(e) => log::debug!(
                "{}: {e} on attempt {}, retrying in {delay:?}",
                chain.run_id(),
                attempt + 1
            ),
        }
        if let Ok(response) = result {
            response.close();
        }

        let request = chain.request().clone();
        send_attempt(chain, options, attempt + 1, Some(delay), request)?;
        Ok(completer.defer())
    };

    match delay {
        None => chain.advance_with(request, interceptor),
        Some(delay) => chain.advance_delayed_with(request, interceptor, delay),
    }
}
