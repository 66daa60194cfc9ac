//! Incoming HTTP request type.

use http::{HeaderMap, Method, Uri, Version};

/// An incoming subrequest, as seen by the pipeline.
///
/// Only the request head is kept. nginx sends auth subrequests without a
/// body and the decision never depends on one, so the body is dropped at
/// the transport boundary instead of being buffered.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
}

impl Request {
    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Case-insensitive header lookup.
    ///
    /// Returns `None` when the header is absent or its value is not visible
    /// ASCII; callers treat both the same way.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl<B> From<http::Request<B>> for Request {
    fn from(req: http::Request<B>) -> Self {
        let (parts, _body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
        }
    }
}
