use crate::common::RejectionReason;
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// A unit of work handed to a [`WorkerPool`] or [`DelayScheduler`](super::DelayScheduler).
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes dispatched calls on worker threads.
///
/// `submit` must either accept the job (it will run exactly once) or refuse it
/// synchronously; a refused job is dropped without running.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: Job) -> Result<(), RejectionReason>;

    /// Stops accepting work. Jobs already accepted still run.
    fn shutdown(&self) {}
}

/// Fixed-size pool of OS threads fed by a flume channel.
///
/// With a queue capacity set, submissions beyond it are refused as
/// [`RejectionReason::Saturated`] instead of growing the backlog.
pub struct ThreadPool {
    sender: Mutex<Option<flume::Sender<Job>>>,
    size: usize,
}

impl ThreadPool {
    pub fn new(size: usize, queue_capacity: Option<usize>) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread pool needs at least one worker",
            ));
        }

        let (sender, receiver) = match queue_capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };

        for index in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("azcore-worker-{index}"))
                .spawn(move || worker_loop(receiver))?;
        }

        log::debug!("ThreadPool: started {size} workers (queue capacity {queue_capacity:?})");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn worker_loop(receiver: flume::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!(
                "Worker {:?}: job panicked: {}",
                thread::current().name(),
                panic_message(payload.as_ref())
            );
        }
    }
    log::debug!("Worker {:?}: channel closed, exiting", thread::current().name());
}

impl WorkerPool for ThreadPool {
    fn submit(&self, job: Job) -> Result<(), RejectionReason> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(RejectionReason::Shutdown);
        };

        sender.try_send(job).map_err(|e| match e {
            flume::TrySendError::Full(_) => RejectionReason::Saturated,
            flume::TrySendError::Disconnected(_) => RejectionReason::Shutdown,
        })
    }

    fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            log::debug!("ThreadPool: shutting down {} workers", self.size);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ThreadPool")
            .field("size", &self.size)
            .field("queued", &sender.as_ref().map_or(0, flume::Sender::len))
            .field("shut_down", &sender.is_none())
            .finish()
    }
}

/// Worker pool backed by a caller-supplied tokio runtime.
///
/// Jobs run on the runtime's blocking threads, since policy code is
/// synchronous.
pub struct TokioWorkerPool {
    handle: Handle,
    cancel_token: CancellationToken,
}

impl TokioWorkerPool {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Uses the runtime the caller is currently inside.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl WorkerPool for TokioWorkerPool {
    fn submit(&self, job: Job) -> Result<(), RejectionReason> {
        if self.cancel_token.is_cancelled() {
            return Err(RejectionReason::Shutdown);
        }
        self.handle.spawn_blocking(job);
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for TokioWorkerPool {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl fmt::Debug for TokioWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioWorkerPool")
            .field("shut_down", &self.cancel_token.is_cancelled())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_thread_pool_runs_jobs() {
        let pool = ThreadPool::new(2, None).unwrap();
        let (tx, rx) = flume::unbounded();

        for i in 0..10 {
            let tx = tx.clone();
            assert_ok!(pool.submit(Box::new(move || tx.send(i).unwrap())));
        }

        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_pool_rejects_after_shutdown() {
        let pool = ThreadPool::new(1, None).unwrap();
        pool.shutdown();
        assert_eq!(pool.submit(Box::new(|| {})), Err(RejectionReason::Shutdown));
    }

    #[test]
    fn test_thread_pool_rejects_when_saturated() {
        let pool = ThreadPool::new(1, Some(1)).unwrap();
        let (release_tx, release_rx) = flume::bounded::<()>(0);
        let (started_tx, started_rx) = flume::bounded::<()>(1);

        // occupy the only worker, then fill the single queue slot
        assert_ok!(pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ok!(pool.submit(Box::new(|| {})));

        assert_eq!(pool.submit(Box::new(|| {})), Err(RejectionReason::Saturated));
        drop(release_tx);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let pool = ThreadPool::new(1, None).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = flume::bounded(1);

        assert_ok!(pool.submit(Box::new(|| panic!("policy bug"))));
        let c = Arc::clone(&counter);
        assert_ok!(pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        })));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        assert_err!(ThreadPool::new(0, None));
    }

    #[test]
    fn test_debug_reports_pool_state() {
        let pool = ThreadPool::new(2, None).unwrap();
        assert!(format!("{pool:?}").contains("shut_down: false"));
        pool.shutdown();
        assert!(format!("{pool:?}").contains("shut_down: true"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_pool_runs_and_rejects_after_shutdown() {
        let pool = TokioWorkerPool::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        assert_ok!(pool.submit(Box::new(move || {
            let _ = tx.send(7);
        })));
        assert_eq!(rx.await.unwrap(), 7);

        pool.shutdown();
        assert_eq!(pool.submit(Box::new(|| {})), Err(RejectionReason::Shutdown));
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
