use super::{Transport, TransportCallback};
use crate::common::{PipelineError, TransportError};
use crate::http::{Headers, Request, Response, ResponseBody, TransportHints};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// [`Transport`] backed by a [`reqwest::Client`].
///
/// I/O runs on the given tokio runtime. When the pipeline marks the request
/// with [`TransportHints::prefer_calling_thread`] and the caller is not itself
/// inside a runtime (the usual case on a dispatcher worker), the send blocks
/// that worker instead of bouncing the continuation to a runtime thread.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    handle: Handle,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientCreation`] if the TLS backend cannot be
    /// initialised.
    pub fn new(handle: Handle) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::ClientCreation {
                reason: e.to_string(),
            })?;
        Ok(Self::from_client(client, handle))
    }

    pub fn from_client(client: reqwest::Client, handle: Handle) -> Self {
        Self {
            client,
            handle,
            timeout: None,
        }
    }

    /// Per-request timeout, reported as [`TransportError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: Request, cancellation: CancellationToken, callback: TransportCallback) {
        let inline = request
            .context()
            .get::<TransportHints>()
            .is_some_and(|hints| hints.prefer_calling_thread)
            && Handle::try_current().is_err();

        let client = self.client.clone();
        let timeout = self.timeout;
        let exchange = async move {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => Err(PipelineError::Cancelled),
                result = execute(client, request, timeout) => result,
            }
        };

        if inline {
            let result = self.handle.block_on(exchange);
            callback(result);
        } else {
            self.handle.spawn(async move {
                let result = exchange.await;
                callback(result);
            });
        }
    }
}

async fn execute(
    client: reqwest::Client,
    request: Request,
    timeout: Option<Duration>,
) -> Result<Response, PipelineError> {
    let url = request.url().to_string();

    let mut builder = client.request(request.method().clone(), request.url().clone());
    for (name, value) in request.headers().iter() {
        builder = builder.header(name, value);
    }
    if !request.body().is_empty() {
        builder = builder.body(request.body().to_vec());
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| map_error(&url, &e, timeout))?;

    let status = response.status().as_u16();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
        match value.to_str() {
            Ok(value) => headers.add(name.as_str(), value),
            Err(_) => log::debug!("ReqwestTransport: skipping non-ASCII header {name}"),
        }
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| map_error(&url, &e, timeout))?;

    log::debug!("ReqwestTransport: {status} from {url} ({} bytes)", body.len());
    Ok(Response::new(
        status,
        headers,
        ResponseBody::new(body.to_vec()),
        request,
    ))
}

fn map_error(url: &str, error: &reqwest::Error, timeout: Option<Duration>) -> PipelineError {
    let error = if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            millis: timeout.map_or(0, |t| t.as_millis()),
        }
    } else if error.is_builder() {
        TransportError::InvalidRequest {
            reason: error.to_string(),
        }
    } else {
        TransportError::RequestFailed {
            url: url.to_string(),
            reason: error.to_string(),
        }
    };
    PipelineError::Transport(error)
}
