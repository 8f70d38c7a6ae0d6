//! HTTP message types flowing through the pipeline.

mod context;
mod headers;
mod request;
mod response;

pub use context::{Context, TransportHints};
pub use headers::Headers;
pub use request::Request;
pub use response::{ReleaseFn, Response, ResponseBody};

pub use reqwest::{Method, Url};
