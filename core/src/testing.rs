//! Deterministic executors for unit tests.
//!
//! [`InlinePool`] runs every job on the submitting thread and [`ManualTimer`]
//! keeps delayed jobs until a test fires them, so a whole pipeline run can be
//! stepped through without threads or sleeps.

use crate::common::{PipelineError, RejectionReason};
use crate::dispatcher::{DelayScheduler, Dispatcher, Job, WorkerPool};
use crate::http::{Headers, Method, Request, Response, ResponseBody};
use crate::pipeline::HttpPipeline;
use crate::policy::Policy;
use crate::transport::{Transport, TransportCallback};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct InlinePool;

impl WorkerPool for InlinePool {
    fn submit(&self, job: Job) -> Result<(), RejectionReason> {
        job();
        Ok(())
    }
}

pub(crate) struct RefusingPool(pub RejectionReason);

impl WorkerPool for RefusingPool {
    fn submit(&self, _job: Job) -> Result<(), RejectionReason> {
        Err(self.0)
    }
}

#[derive(Default)]
pub(crate) struct ManualTimer {
    pending: Mutex<Vec<Job>>,
    delays: Mutex<Vec<Duration>>,
    refusal: Mutex<Option<RejectionReason>>,
}

impl ManualTimer {
    /// Refuses every later `schedule` call with `reason`.
    pub fn refuse(&self, reason: RejectionReason) {
        *self.refusal.lock().unwrap() = Some(reason);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Every delay accepted so far, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    /// Runs the jobs pending right now; jobs they schedule stay pending.
    pub fn fire_all(&self) {
        let jobs = std::mem::take(&mut *self.pending.lock().unwrap());
        for job in jobs {
            job();
        }
    }

    /// Fires until nothing is pending, up to `limit` rounds.
    pub fn drain(&self, limit: usize) {
        for _ in 0..limit {
            if self.pending() == 0 {
                return;
            }
            self.fire_all();
        }
    }
}

impl DelayScheduler for ManualTimer {
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), RejectionReason> {
        if let Some(reason) = *self.refusal.lock().unwrap() {
            return Err(reason);
        }
        self.delays.lock().unwrap().push(delay);
        self.pending.lock().unwrap().push(job);
        Ok(())
    }

    /// Drops every pending job without running it.
    fn shutdown(&self) {
        let jobs = std::mem::take(&mut *self.pending.lock().unwrap());
        drop(jobs);
    }
}

/// A dispatcher that runs everything on the test thread.
pub(crate) fn inline_dispatcher(max_concurrency: usize) -> (Arc<Dispatcher>, Arc<ManualTimer>) {
    let timer = Arc::new(ManualTimer::default());
    let dispatcher = Dispatcher::new(max_concurrency, Arc::new(InlinePool), timer.clone())
        .expect("valid concurrency");
    (dispatcher, timer)
}

pub(crate) fn inline_pipeline(
    policies: Vec<Arc<dyn Policy>>,
    transport: impl Transport,
) -> (HttpPipeline, Arc<ManualTimer>) {
    let (dispatcher, timer) = inline_dispatcher(4);
    let pipeline = policies
        .into_iter()
        .fold(HttpPipeline::builder(), |builder, policy| {
            builder.shared_policy(policy)
        })
        .transport(transport)
        .dispatcher(dispatcher)
        .build()
        .expect("pipeline with transport");
    (pipeline, timer)
}

pub(crate) fn get_request() -> Request {
    Request::parse(Method::GET, "https://contoso.blob.core.windows.net/container/blob")
        .expect("valid url")
}

pub(crate) fn response_for(request: Request, status: u16) -> Response {
    Response::new(status, Headers::new(), ResponseBody::empty(), request)
}

/// Transport answering every request synchronously with the next status from
/// `statuses` (the last one repeats).
#[derive(Clone)]
pub(crate) struct StatusTransport {
    statuses: Arc<Vec<u16>>,
    pub sends: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<Request>>>,
}

impl StatusTransport {
    pub fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: Arc::new(statuses.to_vec()),
            sends: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

impl Transport for StatusTransport {
    fn send(&self, request: Request, _cancellation: CancellationToken, callback: TransportCallback) {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(attempt)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        self.seen.lock().unwrap().push(request.clone());
        callback(Ok(response_for(request, status)));
    }
}

pub(crate) type Outcome = Arc<Mutex<Vec<Result<u16, PipelineError>>>>;

pub(crate) fn outcome() -> Outcome {
    Arc::new(Mutex::new(Vec::new()))
}

/// Callback recording the status (or error) of the delivered result.
pub(crate) fn record(
    outcome: &Outcome,
) -> impl FnOnce(Result<Response, PipelineError>) + Send + 'static {
    let sink = Arc::clone(outcome);
    move |result: Result<Response, PipelineError>| {
        sink.lock().unwrap().push(result.map(|response| response.status()));
    }
}
