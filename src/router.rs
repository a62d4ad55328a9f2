//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path and
//! an [`Endpoint`], you get the endpoint back with its path captures. That is
//! all.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use tracing::Instrument;

use crate::middleware::{method_override, request_id, trace};
use crate::pipeline::Endpoint;
use crate::request::Request;
use crate::response::{Channel, ResponseWriter, http_error};

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Every registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register an endpoint for a method + path pair.
    ///
    /// Path captures use `{name}` syntax and become the lowest-precedence
    /// parameter source:
    ///
    /// ```rust,no_run
    /// # use quire::{Exchange, Pipeline, Router};
    /// # use http::Method;
    /// # async fn show_book(_: &mut Exchange) -> anyhow::Result<()> { Ok(()) }
    /// # async fn create_book(_: &mut Exchange) -> anyhow::Result<()> { Ok(()) }
    /// let app = Pipeline::builder().build();
    /// Router::new()
    ///     .on(Method::GET,  "/books/{id}", app.wrap(show_book))
    ///     .on(Method::POST, "/books",      app.wrap(create_book));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup.
    pub fn on(mut self, method: Method, path: &str, endpoint: Endpoint) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, endpoint)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, endpoint: Endpoint) -> Self { self.on(Method::GET, path, endpoint) }
    pub fn post(self, path: &str, endpoint: Endpoint) -> Self { self.on(Method::POST, path, endpoint) }
    pub fn put(self, path: &str, endpoint: Endpoint) -> Self { self.on(Method::PUT, path, endpoint) }
    pub fn patch(self, path: &str, endpoint: Endpoint) -> Self { self.on(Method::PATCH, path, endpoint) }
    pub fn delete(self, path: &str, endpoint: Endpoint) -> Self { self.on(Method::DELETE, path, endpoint) }

    /// Handles one request with its body already read.
    ///
    /// Applies the [`middleware`](crate::middleware) stack, routes, and falls
    /// back to `404` (no route for the path) or `405` (path exists under other
    /// methods).
    pub async fn handle(&self, mut req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let started = Instant::now();
        let id = request_id::ensure(&mut req);
        let span = trace::request_span(&req, &id);

        async move {
            method_override::apply(&mut req);
            let mut res = self.dispatch(req).await;
            res.headers_mut().insert(request_id::X_REQUEST_ID, id);
            trace::access_log(&res, started.elapsed());
            res
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();

        if let Some((endpoint, route)) = self.lookup(&parts.method, parts.uri.path()) {
            return endpoint.serve(Request::new(parts, body, route)).await;
        }

        let mut channel = Channel::new();
        let allowed = self.allowed_methods(parts.uri.path());
        if allowed.is_empty() {
            http_error(&mut channel, StatusCode::NOT_FOUND, "Not found");
        } else {
            if let Ok(allow) = HeaderValue::from_str(&allowed.join(", ")) {
                channel.headers_mut().insert(ALLOW, allow);
            }
            http_error(&mut channel, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }
        channel.into_response()
    }

    pub(crate) fn lookup<'r>(
        &'r self,
        method: &Method,
        path: &str,
    ) -> Option<(&'r Endpoint, Vec<(String, String)>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value, params))
    }

    fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let mut allowed: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        allowed.sort_unstable();
        allowed
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
