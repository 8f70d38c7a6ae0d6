use crate::chain::PolicyChain;
use crate::common::PipelineError;
use crate::policy::Policy;
use chrono::{DateTime, Utc};

pub const DATE_HEADER: &str = "Date";

/// Stamps each request (and each retry of it) with the current time.
#[derive(Debug, Clone, Default)]
pub struct AddDatePolicy;

/// RFC 1123 date, as HTTP expects it.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl Policy for AddDatePolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let mut request = chain.request().clone();
        request
            .headers_mut()
            .set(DATE_HEADER, format_http_date(Utc::now()));
        chain.advance(request)
    }

    fn name(&self) -> &str {
        "date"
    }
}
