use azcore::dispatcher::{DelayScheduler, Dispatcher, ThreadPool, TokioTimer, WorkerPool};
use azcore::http::{Context, Headers, Method, Request, Response, ResponseBody};
use azcore::policies::{RetryOptions, RetryPolicy};
use azcore::transport::TransportCallback;
use azcore::{CancellationToken, HttpPipeline, PipelineError, Policy, PolicyChain, RejectionReason};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

mod pipeline_helpers {
    use super::*;

    pub fn dispatcher(max_concurrency: usize) -> Arc<Dispatcher> {
        let pool: Arc<dyn WorkerPool> =
            Arc::new(ThreadPool::new(4, None).expect("Failed to start worker pool"));
        let timer: Arc<dyn DelayScheduler> =
            Arc::new(TokioTimer::new().expect("Failed to start timer"));
        Dispatcher::new(max_concurrency, pool, timer).expect("Failed to create dispatcher")
    }

    pub fn request() -> Request {
        Request::parse(Method::GET, "https://contoso.search.windows.net/indexes/hotels")
            .expect("valid url")
    }

    /// Transport answering `status` and counting sends.
    pub fn counting_transport(
        status: u16,
        sends: &Arc<AtomicUsize>,
    ) -> impl Fn(Request, CancellationToken, TransportCallback) + Send + Sync + 'static {
        let sends = Arc::clone(sends);
        move |request: Request, _: CancellationToken, callback: TransportCallback| {
            sends.fetch_add(1, Ordering::SeqCst);
            callback(Ok(Response::new(
                status,
                Headers::new(),
                ResponseBody::empty(),
                request,
            )));
        }
    }

    /// Polls `condition` until it holds or [`WAIT`] elapses.
    pub fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    pub fn send(
        pipeline: &HttpPipeline,
        cancellation: CancellationToken,
    ) -> flume::Receiver<Result<u16, PipelineError>> {
        let (tx, rx) = flume::bounded(2);
        pipeline.send(request(), Context::new(), cancellation, move |result| {
            let _ = tx.send(result.map(|response| response.status()));
        });
        rx
    }
}

use pipeline_helpers::*;

mod end_to_end {
    use super::*;

    #[test]
    fn test_zero_policy_pipeline() {
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .dispatcher(dispatcher(2))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();

        let result = send(&pipeline, CancellationToken::new())
            .recv_timeout(WAIT)
            .unwrap();

        assert_eq!(result, Ok(200));
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_on_server_error() {
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .policy(RetryPolicy::new(RetryOptions::fixed(
                3,
                Duration::from_millis(10),
            )))
            .dispatcher(dispatcher(2))
            .transport(counting_transport(500, &sends))
            .build()
            .unwrap();

        let result = send(&pipeline, CancellationToken::new())
            .recv_timeout(WAIT)
            .unwrap();

        assert_eq!(result, Ok(500));
        assert_eq!(sends.load(Ordering::SeqCst), 4);
        assert_eq!(pipeline.dispatcher().running_count(), 0);
        assert_eq!(pipeline.dispatcher().paused_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_async() {
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .dispatcher(dispatcher(2))
            .transport(counting_transport(204, &sends))
            .build()
            .unwrap();

        let responses = futures::future::join_all(
            (0..3).map(|_| pipeline.send_async(request(), Context::new(), CancellationToken::new())),
        )
        .await;

        assert_eq!(responses.len(), 3);
        for response in responses {
            assert_eq!(response.unwrap().status(), 204);
        }
        assert_eq!(sends.load(Ordering::SeqCst), 3);
    }
}

mod suspension {
    use super::*;

    fn parking_policy(chain: PolicyChain) -> Result<(), PipelineError> {
        let request = chain.request().clone();
        if request.headers().contains("x-park") {
            chain.advance_delayed(request, Duration::from_secs(60))
        } else {
            chain.advance(request)
        }
    }

    #[test]
    fn test_suspended_runs_free_their_slots() {
        const LIMIT: usize = 3;
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .policy(parking_policy)
            .dispatcher(dispatcher(LIMIT))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();

        let mut parked = Vec::new();
        for _ in 0..LIMIT - 1 {
            let (tx, rx) = flume::bounded(1);
            pipeline.send(
                request().with_header("x-park", "1"),
                Context::new(),
                CancellationToken::new(),
                move |result| {
                    let _ = tx.send(result.map(|response| response.status()));
                },
            );
            parked.push(rx);
        }
        // one more run than the limit allows while the others hold slots
        let extra = send(&pipeline, CancellationToken::new());
        let second = send(&pipeline, CancellationToken::new());

        assert_eq!(extra.recv_timeout(WAIT).unwrap(), Ok(200));
        assert_eq!(second.recv_timeout(WAIT).unwrap(), Ok(200));
        assert!(wait_until(|| pipeline.dispatcher().paused_count() == LIMIT - 1));
        assert_eq!(pipeline.dispatcher().running_count(), 0);

        pipeline.dispatcher().shutdown();
        for rx in parked {
            assert_eq!(
                rx.recv_timeout(WAIT).unwrap(),
                Err(PipelineError::Rejected {
                    reason: RejectionReason::Shutdown
                })
            );
        }
    }

    #[test]
    fn test_shutdown_rejects_parked_run_on_a_worker() {
        let threads = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&threads);
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .policy(move |chain: PolicyChain| {
                let seen = Arc::clone(&seen);
                chain.advance_delayed_with(
                    chain.request().clone(),
                    move |result, completer| {
                        let name = std::thread::current().name().map(str::to_string);
                        seen.lock().unwrap().push(name);
                        completer.completed_with(result)
                    },
                    Duration::from_secs(60),
                )
            })
            .dispatcher(dispatcher(2))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();

        let result = send(&pipeline, CancellationToken::new());
        assert!(wait_until(|| pipeline.dispatcher().paused_count() == 1));
        pipeline.dispatcher().shutdown();

        assert_eq!(
            result.recv_timeout(WAIT).unwrap(),
            Err(PipelineError::Rejected {
                reason: RejectionReason::Shutdown
            })
        );
        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert!(
            threads[0]
                .as_deref()
                .is_some_and(|name| name.starts_with("azcore-worker")),
            "interceptor ran on {:?}",
            threads[0]
        );
        assert_eq!(sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .dispatcher(dispatcher(1))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = send(&pipeline, token).recv_timeout(WAIT).unwrap();

        assert_eq!(result, Err(PipelineError::Cancelled));
        assert_eq!(sends.load(Ordering::SeqCst), 0);
    }
}

mod escaped_errors {
    use super::*;

    struct FailingPolicy;

    impl Policy for FailingPolicy {
        fn process(&self, chain: PolicyChain) -> Result<(), PipelineError> {
            // answers, then breaks the contract by also failing
            chain.completed_error(PipelineError::policy("unavailable"))?;
            Err(PipelineError::policy("escaped"))
        }
    }

    #[test]
    fn test_escaped_error_delivered_once() {
        let sends = Arc::new(AtomicUsize::new(0));
        let pipeline = HttpPipeline::builder()
            .policy(|chain: PolicyChain| {
                chain.advance_with(chain.request().clone(), |_result, _completer| {
                    Err(PipelineError::policy("interceptor gave up"))
                })
            })
            .policy(FailingPolicy)
            .dispatcher(dispatcher(2))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();

        let results = send(&pipeline, CancellationToken::new());

        let first = results.recv_timeout(WAIT).unwrap();
        assert!(matches!(first, Err(PipelineError::Escaped { policy: 0, .. })));
        // the second escape aborts the run on its worker; nothing else arrives
        assert!(results.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(sends.load(Ordering::SeqCst), 0);

        // the worker survived the abort
        let pipeline = HttpPipeline::builder()
            .dispatcher(Arc::clone(pipeline.dispatcher()))
            .transport(counting_transport(200, &sends))
            .build()
            .unwrap();
        assert_eq!(
            send(&pipeline, CancellationToken::new()).recv_timeout(WAIT).unwrap(),
            Ok(200)
        );
    }
}
