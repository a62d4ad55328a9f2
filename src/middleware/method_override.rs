//! Method override for HTML forms.
//!
//! Browsers only submit `GET` and `POST`. A `POST` may name the method it
//! stands for in a `_method` form field (body first, then query string) or,
//! when no such field is present, in an `X-HTTP-Method-Override` header. Only
//! the exact names `PUT`, `PATCH` and `DELETE` are honoured; anything else
//! leaves the request untouched.

use bytes::Bytes;
use http::Method;
use http::header::{CONTENT_TYPE, HeaderName};
use tracing::debug;
use url::form_urlencoded;

pub const X_HTTP_METHOD_OVERRIDE: HeaderName = HeaderName::from_static("x-http-method-override");

const FORM_FIELD: &str = "_method";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

pub fn apply(req: &mut http::Request<Bytes>) {
    if req.method() != Method::POST {
        return;
    }
    let Some(method) = from_form(req).or_else(|| from_header(req)) else {
        return;
    };
    let method = match method.as_str() {
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        _ => return,
    };
    debug!(%method, "method overridden");
    *req.method_mut() = method;
}

fn from_header(req: &http::Request<Bytes>) -> Option<String> {
    let value = req.headers().get(X_HTTP_METHOD_OVERRIDE)?.to_str().ok()?;
    Some(value.to_owned())
}

fn from_form(req: &http::Request<Bytes>) -> Option<String> {
    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.split(';').next().is_some_and(|e| e.trim().eq_ignore_ascii_case(FORM_URLENCODED)));

    let body_value = is_form
        .then(|| find_field(req.body()))
        .flatten();
    body_value.or_else(|| find_field(req.uri().query()?.as_bytes()))
}

/// The first non-empty `_method` value.
fn find_field(input: &[u8]) -> Option<String> {
    form_urlencoded::parse(input)
        .find(|(k, v)| k == FORM_FIELD && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
