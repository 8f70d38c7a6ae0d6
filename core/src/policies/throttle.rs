use crate::chain::PolicyChain;
use crate::common::{PipelineError, RateLimitError, RateLimiter};
use crate::policy::Policy;

/// Spreads requests out to stay within a [`RateLimiter`] budget.
///
/// A request over budget is not failed. The run is suspended for the wait the
/// limiter advises and then continues without checking again.
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    limiter: RateLimiter,
}

impl ThrottlePolicy {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl Policy for ThrottlePolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let request = chain.request().clone();
        match self.limiter.check() {
            Ok(()) => chain.advance(request),
            Err(RateLimitError::TooManyRequests { retry_after }) => {
                log::debug!("{}: throttled for {retry_after:?}", chain.run_id());
                chain.advance_delayed(request, retry_after)
            }
        }
    }

    fn name(&self) -> &str {
        "throttle"
    }
}
