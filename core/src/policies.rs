//! # Policies
//!
//! Ready-made [`Policy`](crate::policy::Policy) implementations shared by the
//! client libraries.
//!
//! - [`RetryPolicy`] - re-sends on transport failures and transient statuses
//! - [`RequestIdPolicy`] - `x-ms-client-request-id`
//! - [`UserAgentPolicy`] - `User-Agent`
//! - [`AddDatePolicy`] - `Date`
//! - [`AddHeadersPolicy`] - any fixed set of headers
//! - [`ThrottlePolicy`] - client-side rate limiting

mod date;
mod headers;
mod request_id;
mod retry;
mod throttle;
mod user_agent;

pub use date::{AddDatePolicy, DATE_HEADER, format_http_date};
pub use headers::AddHeadersPolicy;
pub use request_id::{CLIENT_REQUEST_ID_HEADER, RequestIdPolicy};
pub use retry::{RetryOptions, RetryPolicy, RetryStrategy};
pub use throttle::ThrottlePolicy;
pub use user_agent::{USER_AGENT_HEADER, UserAgentPolicy};
