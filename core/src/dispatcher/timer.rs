use super::executor::Job;
use crate::common::RejectionReason;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

/// Runs a job once a delay has elapsed.
///
/// The scheduler only hands work back; it must not be used to run policy code.
/// Acceptance (`Ok`) means the job will run or, on shutdown, be dropped.
pub trait DelayScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), RejectionReason>;

    fn shutdown(&self) {}
}

/// Delay scheduler driven by a tokio runtime.
///
/// [`TokioTimer::new`] owns a single dedicated thread running a current-thread
/// runtime; [`TokioTimer::from_handle`] borrows an existing runtime instead.
/// Pending jobs are dropped on shutdown.
pub struct TokioTimer {
    handle: Handle,
    shutdown: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTimer {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let thread = thread::Builder::new()
            .name("azcore-timer".to_string())
            .spawn(move || {
                runtime.block_on(stop.cancelled());
                log::debug!("TokioTimer: stopped");
            })?;

        Ok(Self {
            handle,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
            thread: Mutex::new(None),
        }
    }
}

impl DelayScheduler for TokioTimer {
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), RejectionReason> {
        if self.shutdown.is_cancelled() {
            return Err(RejectionReason::Shutdown);
        }

        let stop = self.shutdown.clone();
        self.handle.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => job(),
                () = stop.cancelled() => {}
            }
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // never join from the timer thread itself
        if let Some(thread) = thread {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
