//! `x-request-id` propagation.

use bytes::Bytes;
use http::HeaderValue;
use http::header::HeaderName;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Returns the inbound request id, minting a UUID v4 when the client (or the
/// fronting proxy) did not send a usable one. The id is written back onto
/// the request so handlers see it too.
pub fn ensure(req: &mut http::Request<Bytes>) -> HeaderValue {
    if let Some(id) = req.headers().get(&X_REQUEST_ID).filter(|v| !v.is_empty()) {
        return id.clone();
    }
    let minted = uuid::Uuid::new_v4().to_string();
    // a hyphenated UUID is plain ASCII
    let id = HeaderValue::from_str(&minted).unwrap_or_else(|_| HeaderValue::from_static("-"));
    req.headers_mut().insert(X_REQUEST_ID, id.clone());
    id
}
