//! # HTTP Pipeline
//!
//! An [`HttpPipeline`] is an immutable list of policies ending in a
//! transport. [`HttpPipeline::send`] starts one run on the pipeline's
//! [`Dispatcher`]; the result arrives through the callback.
//!
//! ```no_run
//! use azcore::config::PipelineConfig;
//! use azcore::http::{Context, Method, Request};
//! use azcore::pipeline::HttpPipeline;
//! use azcore::transport::ReqwestTransport;
//! use azcore::CancellationToken;
//!
//! # fn example(handle: tokio::runtime::Handle) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env()?;
//! let pipeline = HttpPipeline::from_config(&config, ReqwestTransport::new(handle)?)?;
//!
//! let request = Request::parse(Method::GET, "https://contoso.blob.core.windows.net/c/b")?;
//! pipeline.send(request, Context::new(), CancellationToken::new(), |result| {
//!     match result {
//!         Ok(response) => println!("status {}", response.status()),
//!         Err(e) => eprintln!("failed: {e}"),
//!     }
//! });
//! # Ok(())
//! # }
//! ```

use crate::chain::run::PipelineRun;
use crate::common::{ConfigError, PipelineError, RejectionReason};
use crate::config::{DispatcherConfig, PipelineConfig};
use crate::dispatcher::{CallId, Dispatcher};
use crate::http::{Context, Request, Response};
use crate::policies::{AddDatePolicy, RequestIdPolicy, RetryPolicy, ThrottlePolicy};
use crate::policy::Policy;
use crate::transport::{Transport, TransportPolicy};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ordered policies plus transport, sharing one dispatcher.
///
/// Cloning is cheap; clones share the policies and the dispatcher.
#[derive(Clone)]
pub struct HttpPipeline {
    /// Configured policies followed by the transport policy.
    policies: Arc<[Arc<dyn Policy>]>,
    dispatcher: Arc<Dispatcher>,
}

impl HttpPipeline {
    pub fn builder() -> HttpPipelineBuilder {
        HttpPipelineBuilder::default()
    }

    /// The standard client stack: request id, date, retry and (when
    /// configured) throttling, on a dispatcher sized by `config`.
    pub fn from_config(
        config: &PipelineConfig,
        transport: impl Transport,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = Self::builder()
            .policy(RequestIdPolicy)
            .policy(AddDatePolicy)
            .policy(RetryPolicy::new(config.retry.clone()));
        if let Some(throttle) = &config.throttle {
            builder = builder.policy(ThrottlePolicy::new(throttle.build()?));
        }
        builder
            .dispatcher_config(config.dispatcher.clone())
            .transport(transport)
            .build()
    }

    /// Starts a run and returns its id.
    ///
    /// `callback` is invoked exactly once, possibly before this returns, on
    /// whichever thread finishes the run.
    pub fn send<F>(
        &self,
        mut request: Request,
        context: Context,
        cancellation: CancellationToken,
        callback: F,
    ) -> CallId
    where
        F: FnOnce(Result<Response, PipelineError>) + Send + 'static,
    {
        request.set_context(context);
        request.set_cancellation_token(cancellation);

        let run = PipelineRun::new(
            Arc::clone(&self.policies),
            Arc::clone(&self.dispatcher),
            request,
            Box::new(callback),
        );
        let id = run.id();
        log::debug!("HttpPipeline: queueing {id}");
        self.dispatcher.enqueue(run);
        id
    }

    /// [`send`](HttpPipeline::send) for async callers.
    pub async fn send_async(
        &self,
        request: Request,
        context: Context,
        cancellation: CancellationToken,
    ) -> Result<Response, PipelineError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(request, context, cancellation, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(PipelineError::Rejected {
            reason: RejectionReason::Shutdown,
        }))
    }

    /// Number of configured policies, not counting the transport.
    pub fn policy_count(&self) -> usize {
        self.policies.len() - 1
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl fmt::Debug for HttpPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.policies.iter().map(|policy| policy.name()).collect();
        f.debug_struct("HttpPipeline")
            .field("policies", &names)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[derive(Default)]
pub struct HttpPipelineBuilder {
    policies: Vec<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<Arc<Dispatcher>>,
    dispatcher_config: DispatcherConfig,
}

impl HttpPipelineBuilder {
    /// Appends a policy; policies run in the order they are added.
    pub fn policy(self, policy: impl Policy) -> Self {
        self.shared_policy(Arc::new(policy))
    }

    pub fn shared_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        self.transport = Some(transport);
        self
    }

    /// Runs on an existing dispatcher, typically shared between pipelines.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sizing for a dedicated dispatcher; ignored when
    /// [`dispatcher`](HttpPipelineBuilder::dispatcher) is set.
    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    pub fn build(self) -> Result<HttpPipeline, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Dispatcher::from_config(&self.dispatcher_config)?,
        };

        let mut policies = self.policies;
        policies.push(Arc::new(TransportPolicy::new(transport)));
        log::debug!(
            "HttpPipeline: built with {} policies",
            policies.len() - 1
        );

        Ok(HttpPipeline {
            policies: policies.into(),
            dispatcher,
        })
    }
}
