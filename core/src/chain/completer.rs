use super::PolicyChain;
use super::link::Link;
use crate::common::PipelineError;
use crate::http::Response;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Completed,
    Deferred,
}

/// Proof that an interceptor dealt with the result it was given.
///
/// Only a [`Completer`] can produce one, so an interceptor cannot return
/// without either completing its link or explicitly deferring.
#[must_use = "interceptors must return the CompletionState they obtained"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionState(Resolution);

impl CompletionState {
    /// The interceptor handed the link on (for example to a retry) instead of
    /// completing it.
    pub fn is_deferred(&self) -> bool {
        self.0 == Resolution::Deferred
    }
}

/// Completion handle given to an interceptor.
///
/// It can finish the link exactly once, or [`defer`](Completer::defer) when
/// the link will be completed later through its [`PolicyChain`](super::PolicyChain).
#[derive(Clone)]
pub struct Completer {
    link: Arc<Link>,
}

impl Completer {
    pub(crate) fn new(link: Arc<Link>) -> Self {
        Self { link }
    }

    pub fn completed(&self, response: Response) -> Result<CompletionState, PipelineError> {
        self.link.complete(Ok(response))?;
        Ok(CompletionState(Resolution::Completed))
    }

    pub fn completed_error(&self, error: PipelineError) -> Result<CompletionState, PipelineError> {
        self.link.complete(Err(error))?;
        Ok(CompletionState(Resolution::Completed))
    }

    /// Completes with whatever the downstream link produced.
    pub fn completed_with(
        &self,
        result: Result<Response, PipelineError>,
    ) -> Result<CompletionState, PipelineError> {
        match result {
            Ok(response) => self.completed(response),
            Err(error) => self.completed_error(error),
        }
    }

    pub fn defer(&self) -> CompletionState {
        CompletionState(Resolution::Deferred)
    }

    /// The chain of the link being resolved, for interceptors that advance
    /// again instead of completing.
    ///
    /// An interceptor is stored on its own link, so it must reach the chain
    /// through here rather than capture it.
    pub fn chain(&self) -> PolicyChain {
        PolicyChain::new(Arc::clone(&self.link))
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("policy", &self.link.index())
            .finish()
    }
}
