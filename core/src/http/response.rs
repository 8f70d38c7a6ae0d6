use super::{Headers, Request};
use std::fmt;

/// Hook that hands the underlying connection back to the transport.
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Response payload guarding the transport connection it was read from.
///
/// The connection is released exactly once: explicitly through [`close`] or
/// [`into_bytes`], or on drop as a fallback (which is logged, since it
/// usually means a policy discarded a response without closing it).
///
/// [`close`]: ResponseBody::close
/// [`into_bytes`]: ResponseBody::into_bytes
pub struct ResponseBody {
    bytes: Vec<u8>,
    release: Option<ReleaseFn>,
}

impl ResponseBody {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            release: None,
        }
    }

    /// Body whose connection is returned by `release`.
    pub fn with_release(bytes: impl Into<Vec<u8>>, release: ReleaseFn) -> Self {
        Self {
            bytes: bytes.into(),
            release: Some(release),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Releases the connection and discards the payload.
    pub fn close(mut self) {
        self.release_connection();
    }

    /// Releases the connection and keeps the payload.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.release_connection();
        std::mem::take(&mut self.bytes)
    }

    fn release_connection(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if self.release.is_some() {
            log::debug!("ResponseBody: dropped without close, releasing connection");
            self.release_connection();
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("len", &self.bytes.len())
            .field("open", &self.release.is_some())
            .finish()
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// A received HTTP response and the request that produced it.
///
/// Any status code is a successful response at the pipeline level.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: ResponseBody,
    request: Request,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: ResponseBody, request: Request) -> Self {
        Self {
            status,
            headers,
            body,
            request,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Releases the connection without reading the body.
    pub fn close(self) {
        self.body.close();
    }

    /// Splits the response, handing the body to the caller to release.
    pub fn into_parts(self) -> (u16, Headers, ResponseBody, Request) {
        (self.status, self.headers, self.body, self.request)
    }
}
