use crate::chain::PolicyChain;
use crate::common::PipelineError;
use crate::policy::Policy;
use std::env::consts::{ARCH, OS};

pub const USER_AGENT_HEADER: &str = "User-Agent";

/// Sets `User-Agent` to `[<application id> ]azsdk-rust-<sdk>/<version> (<os>; <arch>)`.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    value: String,
}

impl UserAgentPolicy {
    pub fn new(sdk_name: &str, sdk_version: &str) -> Self {
        Self {
            value: format!("azsdk-rust-{sdk_name}/{sdk_version} ({OS}; {ARCH})"),
        }
    }

    /// Prefixes the header with the calling application's id.
    pub fn with_application_id(mut self, application_id: &str) -> Self {
        let application_id = application_id.trim();
        if !application_id.is_empty() {
            self.value = format!("{application_id} {}", self.value);
        }
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Policy for UserAgentPolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        let mut request = chain.request().clone();
        request.headers_mut().set(USER_AGENT_HEADER, self.value.as_str());
        chain.advance(request)
    }

    fn name(&self) -> &str {
        "user_agent"
    }
}
