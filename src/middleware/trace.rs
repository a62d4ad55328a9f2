//! Per-request span and access log.

use std::time::Duration;

use bytes::Bytes;
use http::HeaderValue;
use http_body_util::Full;
use hyper::body::Body as _;
use tracing::{Span, info, info_span};

/// Opens the span every log line of the request is recorded under.
pub fn request_span(req: &http::Request<Bytes>, request_id: &HeaderValue) -> Span {
    info_span!(
        "request",
        method = %req.method(),
        path = req.uri().path(),
        request_id = request_id.to_str().unwrap_or("-"),
    )
}

/// Emits the access-log event for a finished response.
pub fn access_log(res: &http::Response<Full<Bytes>>, elapsed: Duration) {
    info!(
        status = res.status().as_u16(),
        size = res.body().size_hint().exact().unwrap_or(0),
        elapsed_us = elapsed.as_micros() as u64,
        "HTTP request"
    );
}
