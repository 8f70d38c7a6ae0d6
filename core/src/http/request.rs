use super::{Context, Headers};
use crate::common::TransportError;
use reqwest::{Method, Url};
use tokio_util::sync::CancellationToken;

/// An outgoing HTTP request together with its per-run state.
///
/// A request is owned by the chain link it was handed to. Policies that want
/// to change it clone it, modify the copy and advance with the copy.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Vec<u8>,
    context: Context,
    cancellation: CancellationToken,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Vec::new(),
            context: Context::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Builds a request from a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if `url` does not parse.
    pub fn parse(method: Method, url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidRequest {
            reason: format!("invalid url '{url}': {e}"),
        })?;
        Ok(Self::new(method, url))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_err;

    #[test]
    fn test_parse_rejects_bad_url() {
        assert_err!(Request::parse(Method::GET, "not a url"));
    }

    #[test]
    fn test_clone_shares_cancellation() {
        let request = Request::parse(Method::PUT, "https://account.blob.core.windows.net/c/b")
            .unwrap()
            .with_header("x-ms-blob-type", "BlockBlob")
            .with_body(b"hello".to_vec());

        let copy = request.clone();
        request.cancellation_token().cancel();

        assert!(copy.is_cancelled());
        assert_eq!(copy.body(), b"hello");
        assert_eq!(copy.headers().get("X-MS-BLOB-TYPE"), Some("BlockBlob"));
    }
}
