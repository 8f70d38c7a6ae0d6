use super::link::Link;
use super::PolicyChain;
use crate::common::{DispatchError, PipelineError, RejectionReason};
use crate::dispatcher::{CallId, Dispatcher, RootCall, panic_message};
use crate::http::{Request, Response};
use crate::policy::Policy;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) type ResultCallback = Box<dyn FnOnce(Result<Response, PipelineError>) + Send>;

struct RunState {
    callback: Option<ResultCallback>,
    escapes: usize,
    /// Set by the first escaped error; the chain stops propagating.
    bypassed: bool,
}

/// One execution of a pipeline: the root unit the dispatcher schedules.
///
/// The run owns the caller's callback and the concurrency slot. Whichever
/// path produces the final result (normal propagation, an escaped error,
/// rejection or drop) takes the callback, releases the slot and calls it.
pub(crate) struct PipelineRun {
    id: CallId,
    policies: Arc<[Arc<dyn Policy>]>,
    dispatcher: Arc<Dispatcher>,
    request: Mutex<Option<Request>>,
    state: Mutex<RunState>,
}

impl PipelineRun {
    pub(crate) fn new(
        policies: Arc<[Arc<dyn Policy>]>,
        dispatcher: Arc<Dispatcher>,
        request: Request,
        callback: ResultCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: CallId::next(),
            policies,
            dispatcher,
            request: Mutex::new(Some(request)),
            state: Mutex::new(RunState {
                callback: Some(callback),
                escapes: 0,
                bypassed: false,
            }),
        })
    }

    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn is_bypassed(&self) -> bool {
        self.lock().bypassed
    }

    pub(crate) fn policy_name(&self, index: usize) -> &str {
        self.policies
            .get(index)
            .map_or("<none>", |policy| policy.name())
    }

    /// Runs policy `index` on a fresh link.
    pub(crate) fn invoke(self: &Arc<Self>, index: usize, request: Request, prev: Option<Arc<Link>>) {
        let Some(policy) = self.policies.get(index).cloned() else {
            self.escape(
                index,
                PipelineError::InvalidState {
                    policy: index,
                    state: "past the transport",
                    operation: "advance",
                },
            );
            return;
        };

        let chain = PolicyChain::new(Link::new(Arc::clone(self), index, prev, request));
        match panic::catch_unwind(AssertUnwindSafe(|| policy.process(chain))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.escape(index, error),
            Err(payload) => {
                self.rethrow_if_fatal(payload.as_ref(), index);
                self.escape(index, PipelineError::Panicked(panic_message(payload.as_ref())));
            }
        }
    }

    /// Hands the final result to the caller.
    pub(crate) fn deliver(&self, result: Result<Response, PipelineError>) {
        let callback = self.lock().callback.take();
        match callback {
            Some(callback) => {
                self.release();
                log::debug!("{}: delivering result", self.id);
                callback(result);
            }
            None => {
                log::warn!("{}: result arrived after the run completed, dropping", self.id);
                if let Ok(response) = result {
                    response.close();
                }
            }
        }
    }

    /// Records an error that escaped policy `index` instead of completing.
    ///
    /// The first one ends the run with [`PipelineError::Escaped`]. A second one
    /// means the chain is broken beyond recovery and panics.
    pub(crate) fn escape(&self, index: usize, error: PipelineError) {
        let (escapes, callback) = {
            let mut state = self.lock();
            state.escapes += 1;
            state.bypassed = true;
            (state.escapes, state.callback.take())
        };

        let policy = self.policy_name(index);
        if escapes > 1 {
            log::error!(
                "{}: second error escaped policy {index} ({policy}): {error}",
                self.id
            );
            panic!(
                "{}: second error escaped policy {index} ({policy}) after the run was aborted: {error}",
                self.id
            );
        }

        log::error!("{}: error escaped policy {index} ({policy}): {error}", self.id);
        match callback {
            Some(callback) => {
                self.release();
                callback(Err(PipelineError::Escaped {
                    policy: index,
                    source: Box::new(error),
                }));
            }
            None => log::error!(
                "{}: escaped error after the result was delivered: {error}",
                self.id
            ),
        }
    }

    /// Re-raises a panic from an aborted run so enclosing frames of the same
    /// run do not count it as yet another escape.
    pub(crate) fn rethrow_if_fatal(&self, payload: &(dyn Any + Send), index: usize) {
        if self.lock().escapes > 1 {
            log::error!("{}: unwinding through policy {index}", self.id);
            panic::resume_unwind(Box::new(panic_message(payload)));
        }
    }

    fn release(&self) {
        if let Err(e) = self.dispatcher.finish(self.id) {
            log::error!("{}: failed to release dispatcher slot: {e}", self.id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RootCall for PipelineRun {
    fn id(&self) -> CallId {
        self.id
    }

    fn run(self: Arc<Self>) {
        let request = self
            .request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match request {
            Some(request) => {
                log::debug!("{}: starting", self.id);
                self.invoke(0, request, None);
            }
            None => log::error!("{}: dispatched twice", self.id),
        }
    }

    fn rejected(self: Arc<Self>, error: DispatchError) {
        self.request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.deliver(Err(error.into()));
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        let callback = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .callback
            .take();
        if let Some(callback) = callback {
            log::warn!("{}: dropped without a result, rejecting", self.id);
            if self.dispatcher.finish(self.id).is_err() {
                log::debug!("{}: held no slot when dropped", self.id);
            }
            callback(Err(PipelineError::Rejected {
                reason: RejectionReason::Shutdown,
            }));
        }
    }
}
