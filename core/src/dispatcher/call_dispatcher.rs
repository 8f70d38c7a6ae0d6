use super::call::{CallId, Resumption, RootCall};
use super::executor::{ThreadPool, WorkerPool};
use super::timer::{DelayScheduler, TokioTimer};
use crate::common::{ConfigError, DispatchError, RejectionReason};
use crate::config::DispatcherConfig;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

struct DispatchQueues {
    max_concurrency: usize,
    ready_roots: VecDeque<Arc<dyn RootCall>>,
    ready_nested: VecDeque<Resumption>,
    /// Roots holding a slot.
    running: HashSet<CallId>,
    /// Roots waiting on a delayed resumption; they hold no slot.
    paused: HashSet<CallId>,
}

enum Unit {
    Root(Arc<dyn RootCall>),
    Nested(Resumption),
}

/// Bounded-concurrency executor for pipeline runs.
///
/// A root call holds one of `max_concurrency` slots from the moment it is
/// dispatched until it [pauses](Dispatcher::schedule_delayed) or
/// [finishes](Dispatcher::finish). Paused calls come back as nested units,
/// which are dispatched ahead of roots that have not started yet.
///
/// All bookkeeping happens under one lock. Units are collected under the lock
/// and handed to the worker pool after it is released, so call code that
/// re-enters the dispatcher cannot deadlock.
pub struct Dispatcher {
    queues: Mutex<DispatchQueues>,
    workers: Arc<dyn WorkerPool>,
    timer: Arc<dyn DelayScheduler>,
}

impl Dispatcher {
    /// Builds a dispatcher over the given worker pool and timer.
    pub fn new(
        max_concurrency: usize,
        workers: Arc<dyn WorkerPool>,
        timer: Arc<dyn DelayScheduler>,
    ) -> Result<Arc<Self>, DispatchError> {
        validate_concurrency(max_concurrency)?;
        Ok(Arc::new(Self {
            queues: Mutex::new(DispatchQueues {
                max_concurrency,
                ready_roots: VecDeque::new(),
                ready_nested: VecDeque::new(),
                running: HashSet::new(),
                paused: HashSet::new(),
            }),
            workers,
            timer,
        }))
    }

    /// Builds a dispatcher with its own [`ThreadPool`] and [`TokioTimer`].
    pub fn from_config(config: &DispatcherConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let workers = ThreadPool::new(config.worker_threads, config.worker_queue_capacity)
            .map_err(|source| ConfigError::Startup {
                component: "worker pool",
                source,
            })?;
        let timer = TokioTimer::new().map_err(|source| ConfigError::Startup {
            component: "timer",
            source,
        })?;

        Self::new(config.max_concurrency, Arc::new(workers), Arc::new(timer)).map_err(|e| {
            ConfigError::Invalid {
                field: "dispatcher.max_concurrency".to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Queues a root call and dispatches whatever fits.
    pub fn enqueue(&self, call: Arc<dyn RootCall>) {
        log::debug!("Dispatcher: enqueue {}", call.id());
        self.lock().ready_roots.push_back(call);
        self.dispatch();
    }

    /// Runs `resumption` after `delay`, pausing its root in the meantime.
    ///
    /// The root gives up its slot only once the timer has accepted the job.
    /// If the timer refuses, the resumption's rejection path fires right here
    /// and the root keeps its slot; it is released once, when the run finishes.
    pub fn schedule_delayed(self: &Arc<Self>, resumption: Resumption, delay: Duration) {
        let root = resumption.root();
        let slot = Arc::new(Mutex::new(Pending::Scheduling(resumption)));
        let job = TimerJob {
            slot: Arc::clone(&slot),
            dispatcher: Arc::downgrade(self),
            workers: Arc::clone(&self.workers),
        };

        let scheduled = self.timer.schedule(delay, Box::new(move || job.fire()));
        let unclaimed = {
            let mut slot = lock_pending(&slot);
            match mem::replace(&mut *slot, Pending::Taken) {
                Pending::Scheduling(resumption) if scheduled.is_ok() => {
                    *slot = Pending::Accepted(resumption);
                    None
                }
                Pending::Scheduling(resumption) | Pending::Orphaned(resumption) => Some(resumption),
                other => {
                    // already fired
                    *slot = other;
                    None
                }
            }
        };

        match (scheduled, unclaimed) {
            (Ok(()), None) => {
                log::debug!("Dispatcher: {root} paused for {delay:?}");
                if let Err(e) = self.pause(root) {
                    log::error!("Dispatcher: cannot pause {root}: {e}");
                }
            }
            (Ok(()), Some(resumption)) => {
                log::warn!("Dispatcher: timer dropped resumption of {root} while scheduling it");
                resumption.reject(DispatchError::Rejected {
                    reason: RejectionReason::Shutdown,
                });
            }
            (Err(reason), Some(resumption)) => {
                log::warn!("Dispatcher: timer rejected resumption of {root}: {reason}");
                resumption.reject(DispatchError::Rejected { reason });
            }
            (Err(reason), None) => {
                log::error!("Dispatcher: timer rejected {root} ({reason}) but also ran it");
            }
        }
    }

    /// Marks a root call as done, releasing its slot if it holds one.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotRunning`] if the call was never dispatched or has
    /// already finished.
    pub fn finish(&self, id: CallId) -> Result<(), DispatchError> {
        {
            let mut queues = self.lock();
            if !queues.running.remove(&id) && !queues.paused.remove(&id) {
                return Err(DispatchError::NotRunning { id });
            }
        }
        log::debug!("Dispatcher: {id} finished");
        self.dispatch();
        Ok(())
    }

    /// Changes the concurrency limit and dispatches any newly allowed work.
    pub fn set_max_concurrency(&self, max_concurrency: usize) -> Result<(), DispatchError> {
        validate_concurrency(max_concurrency)?;
        self.lock().max_concurrency = max_concurrency;
        log::debug!("Dispatcher: max concurrency set to {max_concurrency}");
        self.dispatch();
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        self.lock().max_concurrency
    }

    /// Root calls currently holding a slot.
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Root calls paused on a delayed resumption.
    pub fn paused_count(&self) -> usize {
        self.lock().paused.len()
    }

    /// Root calls and resumptions waiting for a slot.
    pub fn queued_count(&self) -> usize {
        let queues = self.lock();
        queues.ready_roots.len() + queues.ready_nested.len()
    }

    /// Stops the timer, then the worker pool.
    ///
    /// Resumptions still waiting on the timer are rejected with
    /// [`RejectionReason::Shutdown`] on the workers before these stop.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        self.workers.shutdown();
    }

    fn pause(&self, id: CallId) -> Result<(), DispatchError> {
        {
            let mut queues = self.lock();
            if !queues.running.remove(&id) {
                return Err(DispatchError::NotRunning { id });
            }
            queues.paused.insert(id);
        }
        self.dispatch();
        Ok(())
    }

    fn resume(&self, resumption: Resumption) {
        log::debug!("Dispatcher: {} ready to resume", resumption.root());
        self.lock().ready_nested.push_back(resumption);
        self.dispatch();
    }

    fn dispatch(&self) {
        let mut discarded = Vec::new();
        let batch = {
            let mut queues = self.lock();
            let mut batch = Vec::new();

            // resumptions of started runs go first
            let mut waiting = VecDeque::new();
            while queues.running.len() < queues.max_concurrency {
                let Some(resumption) = queues.ready_nested.pop_front() else {
                    break;
                };
                let root = resumption.root();
                if queues.paused.remove(&root) {
                    queues.running.insert(root);
                    batch.push(Unit::Nested(resumption));
                } else if queues.running.contains(&root) {
                    // the timer fired before the pause was recorded
                    waiting.push_back(resumption);
                } else {
                    discarded.push(resumption);
                }
            }
            while let Some(resumption) = waiting.pop_back() {
                queues.ready_nested.push_front(resumption);
            }

            while queues.running.len() < queues.max_concurrency {
                let Some(call) = queues.ready_roots.pop_front() else {
                    break;
                };
                queues.running.insert(call.id());
                batch.push(Unit::Root(call));
            }

            batch
        };

        for resumption in discarded {
            log::debug!(
                "Dispatcher: dropping resumption of finished {}",
                resumption.root()
            );
            resumption.discard();
        }

        for unit in batch {
            self.execute(unit);
        }
    }

    fn execute(&self, unit: Unit) {
        match unit {
            Unit::Root(call) => {
                let job_call = Arc::clone(&call);
                if let Err(reason) = self.workers.submit(Box::new(move || job_call.run())) {
                    log::warn!("Dispatcher: worker pool rejected {}: {reason}", call.id());
                    call.rejected(DispatchError::Rejected { reason });
                }
            }
            Unit::Nested(resumption) => {
                let root = resumption.root();
                let pending = Arc::new(Mutex::new(Some(resumption)));
                let job_pending = Arc::clone(&pending);
                let submitted = self.workers.submit(Box::new(move || {
                    if let Some(resumption) = take(&job_pending) {
                        resumption.run();
                    }
                }));
                if let Err(reason) = submitted {
                    log::warn!("Dispatcher: worker pool rejected resumption of {root}: {reason}");
                    if let Some(resumption) = take(&pending) {
                        resumption.reject(DispatchError::Rejected { reason });
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.lock();
        f.debug_struct("Dispatcher")
            .field("max_concurrency", &queues.max_concurrency)
            .field("running", &queues.running.len())
            .field("paused", &queues.paused.len())
            .field("ready_roots", &queues.ready_roots.len())
            .field("ready_nested", &queues.ready_nested.len())
            .finish()
    }
}

fn validate_concurrency(max_concurrency: usize) -> Result<(), DispatchError> {
    if max_concurrency == 0 {
        return Err(DispatchError::InvalidConcurrency {
            requested: max_concurrency,
        });
    }
    Ok(())
}

fn take(slot: &Mutex<Option<Resumption>>) -> Option<Resumption> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Where a resumption handed to the timer stands.
enum Pending {
    /// `schedule` has not returned yet.
    Scheduling(Resumption),
    Accepted(Resumption),
    /// The timer dropped the job before `schedule` returned.
    Orphaned(Resumption),
    Taken,
}

fn lock_pending(slot: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The job a timer holds for one delayed resumption.
///
/// Whether it fires or is dropped with the timer, the resumption continues
/// on the worker pool. Call code only runs on the timer thread when the pool
/// refuses it too.
struct TimerJob {
    slot: Arc<Mutex<Pending>>,
    dispatcher: Weak<Dispatcher>,
    workers: Arc<dyn WorkerPool>,
}

impl TimerJob {
    fn fire(self) {
        let resumption = {
            let mut slot = lock_pending(&self.slot);
            match mem::replace(&mut *slot, Pending::Taken) {
                Pending::Scheduling(resumption) | Pending::Accepted(resumption) => resumption,
                other => {
                    *slot = other;
                    return;
                }
            }
        };
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.resume(resumption),
            None => reject_on_workers(self.workers.as_ref(), resumption, RejectionReason::Shutdown),
        }
    }
}

impl Drop for TimerJob {
    fn drop(&mut self) {
        let accepted = {
            let mut slot = lock_pending(&self.slot);
            match mem::replace(&mut *slot, Pending::Taken) {
                Pending::Accepted(resumption) => Some(resumption),
                Pending::Scheduling(resumption) => {
                    // schedule_delayed still owns the outcome
                    *slot = Pending::Orphaned(resumption);
                    None
                }
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(resumption) = accepted {
            log::debug!(
                "Dispatcher: timer dropped resumption of {}, rejecting",
                resumption.root()
            );
            reject_on_workers(self.workers.as_ref(), resumption, RejectionReason::Shutdown);
        }
    }
}

/// Fires the rejection path of `resumption` on a worker, or on the calling
/// thread if the pool refuses the job.
fn reject_on_workers(workers: &dyn WorkerPool, resumption: Resumption, reason: RejectionReason) {
    let pending = Arc::new(Mutex::new(Some(resumption)));
    let job_pending = Arc::clone(&pending);
    let submitted = workers.submit(Box::new(move || {
        if let Some(resumption) = take(&job_pending) {
            resumption.reject(DispatchError::Rejected { reason });
        }
    }));
    if let Err(refused) = submitted {
        if let Some(resumption) = take(&pending) {
            log::warn!(
                "Dispatcher: worker pool {refused}, rejecting resumption of {} inline",
                resumption.root()
            );
            resumption.reject(DispatchError::Rejected { reason });
        }
    }
}
