//! # Pipeline Policy Chain
//!
//! The per-run cursor a [`Policy`](crate::policy::Policy) uses to move a
//! request down the pipeline and its response back up.
//!
//! Every run builds one link per policy it reaches. A policy either
//! advances to the next link, optionally registering an interceptor that
//! receives the downstream result, or completes its own link. Results travel
//! up in strict reverse order; each link hands exactly one result to its
//! predecessor.
//!
//! Delayed advances suspend the run: it holds no worker thread and no
//! dispatcher slot until the delay elapses.

mod completer;
mod link;
pub(crate) mod run;

pub use completer::{Completer, CompletionState};

use crate::common::PipelineError;
use crate::dispatcher::CallId;
use crate::http::{Context, Request, Response};
use link::{Interceptor, Link};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handle on one link of a running pipeline.
///
/// Cloning is cheap and all clones refer to the same link. An interceptor
/// must not capture the chain of the link it is registered on; the link
/// would then own itself and outlive its run. Use [`Completer::chain`] to
/// re-advance (see [`RetryPolicy`](crate::policies::RetryPolicy)).
#[derive(Clone)]
pub struct PolicyChain {
    link: Arc<Link>,
}

impl PolicyChain {
    pub(crate) fn new(link: Arc<Link>) -> Self {
        Self { link }
    }

    /// The request as this policy received it.
    pub fn request(&self) -> &Request {
        self.link.request()
    }

    pub fn context(&self) -> &Context {
        self.link.request().context()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.link.request().cancellation_token()
    }

    /// Position of the current policy in the pipeline.
    pub fn policy_index(&self) -> usize {
        self.link.index()
    }

    pub fn run_id(&self) -> CallId {
        self.link.run().id()
    }

    /// Passes `request` to the next policy; its result goes straight up.
    pub fn advance(&self, request: Request) -> Result<(), PipelineError> {
        self.link.advance(request, None)
    }

    /// Passes `request` to the next policy and routes its result through
    /// `interceptor`.
    pub fn advance_with<F>(&self, request: Request, interceptor: F) -> Result<(), PipelineError>
    where
        F: FnOnce(Result<Response, PipelineError>, Completer) -> Result<CompletionState, PipelineError>
            + Send
            + 'static,
    {
        self.link.advance(request, Some(boxed(interceptor)))
    }

    /// Suspends the run and passes `request` on after `delay`.
    pub fn advance_delayed(&self, request: Request, delay: Duration) -> Result<(), PipelineError> {
        self.link.advance_delayed(request, None, delay)
    }

    pub fn advance_delayed_with<F>(
        &self,
        request: Request,
        interceptor: F,
        delay: Duration,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(Result<Response, PipelineError>, Completer) -> Result<CompletionState, PipelineError>
            + Send
            + 'static,
    {
        self.link
            .advance_delayed(request, Some(boxed(interceptor)), delay)
    }

    /// Answers the request at this policy.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AlreadyCompleted`] if the link was completed before.
    pub fn completed(&self, response: Response) -> Result<(), PipelineError> {
        self.link.complete(Ok(response))
    }

    pub fn completed_error(&self, error: PipelineError) -> Result<(), PipelineError> {
        self.link.complete(Err(error))
    }

    pub fn completed_with(&self, result: Result<Response, PipelineError>) -> Result<(), PipelineError> {
        self.link.complete(result)
    }
}

impl fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyChain")
            .field("run", &self.run_id())
            .field("policy", &self.policy_index())
            .finish()
    }
}

fn boxed<F>(interceptor: F) -> Interceptor
where
    F: FnOnce(Result<Response, PipelineError>, Completer) -> Result<CompletionState, PipelineError>
        + Send
        + 'static,
{
    Box::new(interceptor)
}
