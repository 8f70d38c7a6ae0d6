use crate::chain::PolicyChain;
use crate::common::PipelineError;
use crate::policy::Policy;
use uuid::Uuid;

pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Tags each request with a client request id unless the caller set one.
///
/// Placed before [`RetryPolicy`](super::RetryPolicy), every attempt of a run
/// carries the same id.
#[derive(Debug, Clone, Default)]
pub struct RequestIdPolicy;

impl Policy for RequestIdPolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let mut request = chain.request().clone();
        if !request.headers().contains(CLIENT_REQUEST_ID_HEADER) {
            request
                .headers_mut()
                .set(CLIENT_REQUEST_ID_HEADER, Uuid::new_v4().to_string());
        }
        chain.advance(request)
    }

    fn name(&self) -> &str {
        "request_id"
    }
}
