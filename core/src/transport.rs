//! # Transport
//!
//! The network end of the pipeline. Every pipeline ends with an implicit
//! [`TransportPolicy`] that hands the request to a [`Transport`] and completes
//! the last link with whatever the transport reports.
//!
//! - [`Transport`] - send a request, answer through a callback
//! - [`ReqwestTransport`] - [`reqwest`] client driven by a tokio runtime

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use crate::chain::PolicyChain;
use crate::common::PipelineError;
use crate::http::{Request, Response, TransportHints};
use crate::policy::Policy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives the outcome of a transport send. Called exactly once.
pub type TransportCallback = Box<dyn FnOnce(Result<Response, PipelineError>) + Send>;

/// Sends requests over the network.
///
/// Implementations may call `callback` before `send` returns or later from
/// any thread. A status code of any value is a successful send; only I/O
/// failures and cancellation are errors.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request, cancellation: CancellationToken, callback: TransportCallback);
}

impl<F> Transport for F
where
    F: Fn(Request, CancellationToken, TransportCallback) + Send + Sync + 'static,
{
    fn send(&self, request: Request, cancellation: CancellationToken, callback: TransportCallback) {
        self(request, cancellation, callback)
    }
}

/// Terminal policy every pipeline appends after its configured policies.
pub(crate) struct TransportPolicy {
    transport: Arc<dyn Transport>,
}

impl TransportPolicy {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Policy for TransportPolicy {
    fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
        if chain.cancellation_token().is_cancelled() {
            log::debug!("{}: cancelled before send", chain.run_id());
            return chain.completed_error(PipelineError::Cancelled);
        }

        let mut request = chain.request().clone();
        request.context_mut().insert(TransportHints {
            prefer_calling_thread: true,
        });
        let cancellation = request.cancellation_token().clone();
        log::debug!(
            "{}: sending {} {}",
            chain.run_id(),
            request.method(),
            request.url()
        );

        self.transport.send(
            request,
            cancellation,
            Box::new(move |result| {
                if let Err(e) = chain.completed_with(result) {
                    log::error!("{}: transport result not accepted: {e}", chain.run_id());
                }
            }),
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "transport"
    }
}
