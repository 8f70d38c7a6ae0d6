use azcore::DispatchError;
use azcore::dispatcher::{
    CallId, DelayScheduler, Dispatcher, Resumption, RootCall, ThreadPool, TokioTimer, WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

mod dispatcher_helpers {
    use super::*;

    pub fn dispatcher(max_concurrency: usize, workers: usize) -> Arc<Dispatcher> {
        let pool: Arc<dyn WorkerPool> =
            Arc::new(ThreadPool::new(workers, None).expect("Failed to start worker pool"));
        let timer: Arc<dyn DelayScheduler> =
            Arc::new(TokioTimer::new().expect("Failed to start timer"));
        Dispatcher::new(max_concurrency, pool, timer).expect("Failed to create dispatcher")
    }

    /// Root call that tracks how many calls are inside `run` at once.
    pub struct CountingCall {
        pub id: CallId,
        pub dispatcher: Arc<Dispatcher>,
        pub active: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
        pub done: flume::Sender<CallId>,
    }

    impl RootCall for CountingCall {
        fn id(&self) -> CallId {
            self.id
        }

        fn run(self: Arc<Self>) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.dispatcher.finish(self.id).expect("slot held while running");
            let _ = self.done.send(self.id);
        }

        fn rejected(self: Arc<Self>, error: DispatchError) {
            panic!("call {} rejected: {error}", self.id);
        }
    }

    /// Root call that blocks its worker until the gate closes.
    pub struct GatedCall {
        pub id: CallId,
        pub started: flume::Sender<CallId>,
        pub gate: flume::Receiver<()>,
    }

    impl RootCall for GatedCall {
        fn id(&self) -> CallId {
            self.id
        }

        fn run(self: Arc<Self>) {
            let _ = self.started.send(self.id);
            let _ = self.gate.recv();
        }

        fn rejected(self: Arc<Self>, error: DispatchError) {
            panic!("call {} rejected: {error}", self.id);
        }
    }
}

use dispatcher_helpers::*;

mod concurrency_bound {
    use super::*;

    #[test]
    fn test_concurrent_enqueues_never_exceed_limit() {
        let dispatcher = dispatcher(4, 8);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = flume::unbounded();

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let done = done_tx.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        dispatcher.enqueue(Arc::new(CountingCall {
                            id: CallId::next(),
                            dispatcher: Arc::clone(&dispatcher),
                            active: Arc::clone(&active),
                            peak: Arc::clone(&peak),
                            done: done.clone(),
                        }));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        for _ in 0..200 {
            done_rx.recv_timeout(WAIT).expect("call did not finish");
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "observed {peak} concurrent calls");
        assert!(peak >= 1);
        assert_eq!(dispatcher.running_count(), 0);
        assert_eq!(dispatcher.queued_count(), 0);
    }

    #[test]
    fn test_raising_limit_starts_waiting_calls() {
        let dispatcher = dispatcher(1, 8);
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);

        let ids: Vec<CallId> = (0..5)
            .map(|_| {
                let call = Arc::new(GatedCall {
                    id: CallId::next(),
                    started: started_tx.clone(),
                    gate: gate_rx.clone(),
                });
                let id = call.id;
                dispatcher.enqueue(call);
                id
            })
            .collect();

        started_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(dispatcher.running_count(), 1);
        assert_eq!(dispatcher.queued_count(), 4);

        dispatcher.set_max_concurrency(5).unwrap();

        assert_eq!(dispatcher.running_count(), 5);
        assert_eq!(dispatcher.queued_count(), 0);
        for _ in 0..4 {
            started_rx.recv_timeout(WAIT).expect("queued call did not start");
        }

        drop(gate_tx);
        for id in ids {
            dispatcher.finish(id).unwrap();
        }
        assert_eq!(dispatcher.running_count(), 0);
    }
}

mod delayed_resumption {
    use super::*;

    #[test]
    fn test_resumption_runs_after_delay_and_releases_slot_meanwhile() {
        let dispatcher = dispatcher(1, 2);
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let call = Arc::new(GatedCall {
            id: CallId::next(),
            started: started_tx,
            gate: gate_rx,
        });
        let root = call.id;
        drop(gate_tx);
        dispatcher.enqueue(call);
        started_rx.recv_timeout(WAIT).unwrap();

        let (resumed_tx, resumed_rx) = flume::bounded(1);
        dispatcher.schedule_delayed(
            Resumption::new(
                root,
                move || resumed_tx.send("resumed").unwrap(),
                |e| panic!("resumption rejected: {e}"),
            ),
            Duration::from_millis(20),
        );

        assert_eq!(dispatcher.running_count(), 0);
        assert_eq!(dispatcher.paused_count(), 1);

        assert_eq!(resumed_rx.recv_timeout(WAIT).unwrap(), "resumed");
        assert_eq!(dispatcher.paused_count(), 0);
        dispatcher.finish(root).unwrap();
        assert_eq!(dispatcher.running_count(), 0);
    }

    #[test]
    fn test_shutdown_rejects_pending_resumptions() {
        let dispatcher = dispatcher(2, 2);
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        drop(gate_tx);
        let call = Arc::new(GatedCall {
            id: CallId::next(),
            started: started_tx,
            gate: gate_rx,
        });
        let root = call.id;
        dispatcher.enqueue(call);
        started_rx.recv_timeout(WAIT).unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let rejected = Arc::clone(&outcome);
        dispatcher.schedule_delayed(
            Resumption::new(
                root,
                || panic!("should not run"),
                move |e| *rejected.lock().unwrap() = Some(e),
            ),
            Duration::from_secs(60),
        );

        dispatcher.shutdown();

        assert!(matches!(
            *outcome.lock().unwrap(),
            Some(DispatchError::Rejected { .. })
        ));
    }
}
