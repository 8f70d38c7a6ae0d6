use crate::chain::PolicyChain;
use crate::common::PipelineError;
use crate::http::Headers;
use crate::policy::Policy;

/// Sets a fixed group of headers on every request, replacing existing values.
#[derive(Debug, Clone)]
pub struct AddHeadersPolicy {
    headers: Headers,
}

impl AddHeadersPolicy {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }
}

impl Policy for AddHeadersPolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let mut request = chain.request().clone();
        for (name, value) in self.headers.iter() {
            request.headers_mut().set(name, value);
        }
        chain.advance(request)
    }

    fn name(&self) -> &str {
        "add_headers"
    }
}
