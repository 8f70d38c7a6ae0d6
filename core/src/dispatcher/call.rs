use crate::common::{DispatchError, RejectionReason};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a root unit of work for as long as the dispatcher tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// A unit of work that owns a concurrency slot for its whole run.
///
/// The dispatcher calls exactly one of [`run`](RootCall::run) or
/// [`rejected`](RootCall::rejected). Either way the slot stays held until the
/// owner calls [`Dispatcher::finish`](super::Dispatcher::finish).
pub trait RootCall: Send + Sync + 'static {
    fn id(&self) -> CallId;

    /// Executes on a worker thread.
    fn run(self: Arc<Self>);

    /// The worker pool refused the call; it never ran.
    fn rejected(self: Arc<Self>, error: DispatchError);
}

type RunFn = Box<dyn FnOnce() + Send>;
type RejectFn = Box<dyn FnOnce(DispatchError) + Send>;

/// A nested unit of work: the delayed continuation of a paused root call.
///
/// Exactly one of its two paths fires. If it is dropped before either ran
/// (for example because the timer shut down with it still pending) the
/// rejection path fires with [`RejectionReason::Shutdown`], so a paused run is
/// never silently lost.
pub struct Resumption {
    root: CallId,
    run: Option<RunFn>,
    reject: Option<RejectFn>,
}

impl Resumption {
    pub fn new<R, E>(root: CallId, run: R, reject: E) -> Self
    where
        R: FnOnce() + Send + 'static,
        E: FnOnce(DispatchError) + Send + 'static,
    {
        Self {
            root,
            run: Some(Box::new(run)),
            reject: Some(Box::new(reject)),
        }
    }

    pub fn root(&self) -> CallId {
        self.root
    }

    pub(crate) fn run(mut self) {
        self.reject = None;
        if let Some(run) = self.run.take() {
            run();
        }
    }

    pub(crate) fn reject(mut self, error: DispatchError) {
        self.run = None;
        if let Some(reject) = self.reject.take() {
            reject(error);
        }
    }

    /// Drops both paths without firing either; used once the root run is over.
    pub(crate) fn discard(mut self) {
        self.run = None;
        self.reject = None;
    }
}

impl Drop for Resumption {
    fn drop(&mut self) {
        if self.run.take().is_some() {
            if let Some(reject) = self.reject.take() {
                log::warn!(
                    "Resumption for {} dropped before running, rejecting",
                    self.root
                );
                reject(DispatchError::Rejected {
                    reason: RejectionReason::Shutdown,
                });
            }
        }
    }
}

impl fmt::Debug for Resumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumption")
            .field("root", &self.root)
            .field("pending", &self.run.is_some())
            .finish()
    }
}
