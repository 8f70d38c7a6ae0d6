//! # Azure Mobile Core
//!
//! HTTP pipeline and call dispatcher shared by the Azure mobile client
//! libraries (Chat, Storage Blob, Search).
//!
//! A request travels down an ordered list of policies to a transport and its
//! response travels back up in reverse order. Runs execute on a dispatcher
//! that bounds how many make progress at once; a policy that needs to wait
//! (a retry back-off, a throttle) suspends its run without holding a thread
//! or a concurrency slot.
//!
//! ## Modules
//!
//! - [`pipeline`] - [`HttpPipeline`] and its builder
//! - [`policy`] - the [`Policy`] trait
//! - [`chain`] - [`PolicyChain`], [`Completer`] and [`CompletionState`]
//! - [`policies`] - retry, request id, user agent, date, headers, throttling
//! - [`transport`] - the [`Transport`] trait and a reqwest implementation
//! - [`dispatcher`] - bounded-concurrency execution and delayed resumption
//! - [`http`] - request, response, headers and context types
//! - [`config`] - pipeline configuration from JSON and the environment
//! - [`common`] - error types and the rate limiter
//! - [`utils`] - environment variable helpers

pub mod chain;
pub mod common;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod pipeline;
pub mod policies;
pub mod policy;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{Completer, CompletionState, PolicyChain};
pub use common::{ConfigError, DispatchError, PipelineError, RejectionReason, TransportError};
pub use pipeline::{HttpPipeline, HttpPipelineBuilder};
pub use policy::Policy;
pub use transport::Transport;

pub use tokio_util::sync::CancellationToken;
