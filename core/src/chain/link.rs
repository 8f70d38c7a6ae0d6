use super::completer::{Completer, CompletionState};
use super::run::PipelineRun;
use crate::common::PipelineError;
use crate::dispatcher::{Resumption, panic_message};
use crate::http::{Request, Response};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Callback a policy registers to see the downstream result on the way up.
pub(crate) type Interceptor = Box<
    dyn FnOnce(Result<Response, PipelineError>, Completer) -> Result<CompletionState, PipelineError>
        + Send,
>;

enum LinkState {
    /// The policy is processing and has not advanced yet.
    Created,
    /// A delayed advance is pending with the timer.
    Advancing(Option<Interceptor>),
    /// Advanced without an interceptor; the result passes straight through.
    Delegated,
    /// Advanced with an interceptor waiting for the downstream result.
    Intercepting(Interceptor),
    /// The interceptor has the result; it may complete, re-advance or defer.
    Resolving,
    Completed,
}

impl LinkState {
    fn name(&self) -> &'static str {
        match self {
            LinkState::Created => "created",
            LinkState::Advancing(_) => "advancing",
            LinkState::Delegated => "delegated",
            LinkState::Intercepting(_) => "intercepting",
            LinkState::Resolving => "resolving",
            LinkState::Completed => "completed",
        }
    }
}

enum Arrival {
    PassThrough,
    Intercept(Interceptor),
    Late,
    Unexpected(&'static str),
}

/// Position of one policy within one run.
///
/// Each link receives exactly one result from the link after it (or from the
/// transport) and hands exactly one result to the link before it.
pub(crate) struct Link {
    run: Arc<PipelineRun>,
    index: usize,
    prev: Option<Arc<Link>>,
    request: Request,
    state: Mutex<LinkState>,
}

impl Link {
    pub(crate) fn new(
        run: Arc<PipelineRun>,
        index: usize,
        prev: Option<Arc<Link>>,
        request: Request,
    ) -> Arc<Self> {
        Arc::new(Self {
            run,
            index,
            prev,
            request,
            state: Mutex::new(LinkState::Created),
        })
    }

    pub(crate) fn run(&self) -> &Arc<PipelineRun> {
        &self.run
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn advance(
        self: &Arc<Self>,
        request: Request,
        interceptor: Option<Interceptor>,
    ) -> Result<(), PipelineError> {
        let next = match interceptor {
            Some(interceptor) => LinkState::Intercepting(interceptor),
            None => LinkState::Delegated,
        };
        self.begin_advance("advance", next)?;
        self.run
            .invoke(self.index + 1, request, Some(Arc::clone(self)));
        Ok(())
    }

    /// Suspends the run and advances after `delay`.
    ///
    /// The run gives up its worker and its dispatcher slot until the timer
    /// fires. A refused timer or a cancelled request surfaces as the
    /// downstream result of this link.
    pub(crate) fn advance_delayed(
        self: &Arc<Self>,
        request: Request,
        interceptor: Option<Interceptor>,
        delay: Duration,
    ) -> Result<(), PipelineError> {
        self.begin_advance("advance_delayed", LinkState::Advancing(interceptor))?;

        let resumed = Arc::clone(self);
        let rejected = Arc::clone(self);
        let resumption = Resumption::new(
            self.run.id(),
            move || resumed.resume(request),
            move |error| rejected.on_next_result(Err(error.into())),
        );
        log::debug!(
            "{}: policy {} advancing after {delay:?}",
            self.run.id(),
            self.index
        );
        self.run.dispatcher().schedule_delayed(resumption, delay);
        Ok(())
    }

    fn resume(self: &Arc<Self>, request: Request) {
        if self.run.is_bypassed() {
            self.abandon();
            return;
        }
        if request.is_cancelled() {
            log::debug!(
                "{}: cancelled while policy {} was waiting",
                self.run.id(),
                self.index
            );
            self.on_next_result(Err(PipelineError::Cancelled));
            return;
        }

        {
            let mut state = self.lock();
            match mem::replace(&mut *state, LinkState::Completed) {
                LinkState::Advancing(Some(interceptor)) => {
                    *state = LinkState::Intercepting(interceptor);
                }
                LinkState::Advancing(None) => *state = LinkState::Delegated,
                other => {
                    let name = other.name();
                    *state = other;
                    drop(state);
                    log::warn!(
                        "{}: policy {} resumed while {name}, ignoring",
                        self.run.id(),
                        self.index
                    );
                    return;
                }
            }
        }
        self.run
            .invoke(self.index + 1, request, Some(Arc::clone(self)));
    }

    /// Receives the result of the next link.
    pub(crate) fn on_next_result(self: &Arc<Self>, result: Result<Response, PipelineError>) {
        if self.run.is_bypassed() {
            log::debug!(
                "{}: run aborted, dropping result at policy {}",
                self.run.id(),
                self.index
            );
            self.abandon();
            return;
        }

        let arrival = {
            let mut state = self.lock();
            match mem::replace(&mut *state, LinkState::Resolving) {
                LinkState::Delegated | LinkState::Advancing(None) => {
                    *state = LinkState::Completed;
                    Arrival::PassThrough
                }
                LinkState::Intercepting(interceptor) | LinkState::Advancing(Some(interceptor)) => {
                    Arrival::Intercept(interceptor)
                }
                LinkState::Completed => {
                    *state = LinkState::Completed;
                    Arrival::Late
                }
                other => {
                    let name = other.name();
                    *state = other;
                    Arrival::Unexpected(name)
                }
            }
        };

        match arrival {
            Arrival::PassThrough => self.propagate(result),
            Arrival::Intercept(interceptor) => self.intercept(interceptor, result),
            Arrival::Late => {
                log::warn!(
                    "{}: policy {} already completed, dropping late result",
                    self.run.id(),
                    self.index
                );
                if let Ok(response) = result {
                    response.close();
                }
            }
            Arrival::Unexpected(state) => log::error!(
                "{}: policy {} got a downstream result while {state}",
                self.run.id(),
                self.index
            ),
        }
    }

    /// Completes this link and hands `result` up the chain.
    pub(crate) fn complete(
        self: &Arc<Self>,
        result: Result<Response, PipelineError>,
    ) -> Result<(), PipelineError> {
        let previous = {
            let mut state = self.lock();
            match *state {
                LinkState::Completed => None,
                LinkState::Advancing(_) => {
                    return Err(self.invalid_state("advancing", "complete"));
                }
                _ => Some(mem::replace(&mut *state, LinkState::Completed)),
            }
        };
        let Some(previous) = previous else {
            log::error!(
                "{}: policy {} ({}) completed more than once",
                self.run.id(),
                self.index,
                self.run.policy_name(self.index)
            );
            return Err(PipelineError::AlreadyCompleted { policy: self.index });
        };
        // an interceptor still waiting for the downstream result is dropped here
        drop(previous);

        self.propagate(result);
        Ok(())
    }

    fn intercept(self: &Arc<Self>, interceptor: Interceptor, result: Result<Response, PipelineError>) {
        let completer = Completer::new(Arc::clone(self));
        match panic::catch_unwind(AssertUnwindSafe(move || interceptor(result, completer))) {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => self.run.escape(self.index, error),
            Err(payload) => {
                self.run.rethrow_if_fatal(payload.as_ref(), self.index);
                self.run.escape(
                    self.index,
                    PipelineError::Panicked(format!(
                        "interceptor: {}",
                        panic_message(payload.as_ref())
                    )),
                );
            }
        }
    }

    fn propagate(&self, result: Result<Response, PipelineError>) {
        match &self.prev {
            Some(prev) => prev.on_next_result(result),
            None => self.run.deliver(result),
        }
    }

    fn begin_advance(&self, operation: &'static str, next: LinkState) -> Result<(), PipelineError> {
        let current = {
            let mut state = self.lock();
            match *state {
                LinkState::Created | LinkState::Resolving => {
                    *state = next;
                    return Ok(());
                }
                ref other => other.name(),
            }
        };
        Err(self.invalid_state(current, operation))
    }

    /// Drops whatever the link still holds once the run has been aborted.
    fn abandon(&self) {
        let previous = mem::replace(&mut *self.lock(), LinkState::Completed);
        drop(previous);
    }

    fn invalid_state(&self, state: &'static str, operation: &'static str) -> PipelineError {
        log::error!(
            "{}: policy {} cannot {operation} while {state}",
            self.run.id(),
            self.index
        );
        PipelineError::InvalidState {
            policy: self.index,
            state,
            operation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
