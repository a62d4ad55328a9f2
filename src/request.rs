//! Incoming HTTP request type.

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};

/// An incoming HTTP request with its body already read off the connection.
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Bytes,
    pub(crate) route: Vec<(String, String)>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes, route: Vec<(String, String)>) -> Self {
        Self { parts, body, route }
    }

    /// Builds a request outside the router, with explicit route captures.
    pub fn from_http(req: http::Request<Bytes>, route: Vec<(String, String)>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body, route)
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path capture.
    ///
    /// For a route `/books/{id}`, `req.param("id")` on `/books/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.route.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// All path captures, in route order.
    pub fn route_params(&self) -> &[(String, String)] {
        &self.route
    }

    /// Request extensions, for data attached by middleware.
    pub fn extensions(&self) -> &http::Extensions {
        &self.parts.extensions
    }
}
