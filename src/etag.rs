//! Automatic ETags and conditional GETs over a fully buffered body.
//!
//! # Finalization, in order
//!
//! 1. Sniff `Content-Type` from the body if the handler did not set one.
//! 2. Only a `GET` without a handler-supplied `ETag` gets a computed one.
//! 3. SHA-256 over the body, minus every span the [`DigestFilter`] matches.
//! 4. Render as a weak validator: `W/"<base64url, no padding>"`.
//! 5. `If-None-Match` equal to that token → bare `304`, body dropped.
//! 6. Otherwise set `ETag`, apply the pending status, copy the body out.
//!
//! The filter is what lets a page carrying a one-time anti-forgery token
//! still validate as unchanged: the token is cut out of the hash input, so
//! two renders that differ only there hash the same.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderValue, Method, StatusCode};
use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::request::Request;
use crate::response::{BufferedResponse, Channel, ResponseWriter};
use crate::sniff::detect_content_type;

/// Excludes matching body spans from the ETag digest.
///
/// Built once per [`Pipeline`](crate::Pipeline), not per request.
#[derive(Clone, Debug)]
pub struct DigestFilter(Regex);

impl DigestFilter {
    pub fn new(pattern: Regex) -> Self {
        Self(pattern)
    }

    /// Compiles `pattern` as a bytes regex.
    pub fn from_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Computes the weak validator for `body`.
///
/// Matched spans are removed, not blanked: everything outside them is hashed
/// in order as one continuous stream.
pub fn digest(body: &[u8], filter: Option<&DigestFilter>) -> String {
    let mut hasher = Sha256::new();
    match filter {
        None => hasher.update(body),
        Some(DigestFilter(re)) => {
            let mut cursor = 0;
            for m in re.find_iter(body) {
                hasher.update(&body[cursor..m.start()]);
                cursor = m.end();
            }
            hasher.update(&body[cursor..]);
        }
    }
    format!("W/\"{}\"", URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Moves a successful (or fully recovered) response onto the real channel.
pub(crate) fn finalize(
    mut res: BufferedResponse,
    req: &Request,
    filter: Option<&DigestFilter>,
) -> Channel {
    if !res.headers().contains_key(CONTENT_TYPE) {
        let sniffed = detect_content_type(res.body());
        res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(sniffed));
    }

    let etag = (req.method() == Method::GET && !res.headers().contains_key(ETAG))
        .then(|| digest(res.body(), filter));

    let (mut channel, body, pending_status) = res.into_parts();

    if let Some(etag) = etag {
        let cached = req.header(IF_NONE_MATCH.as_str());
        if cached == Some(etag.as_str()) {
            debug!(%etag, "etag matched, not modified");
            channel.write_status(StatusCode::NOT_MODIFIED);
            return channel;
        }

        match HeaderValue::from_str(&etag) {
            Ok(value) => {
                channel.headers_mut().insert(ETAG, value);
            }
            // unreachable in practice: base64url is always a valid header value
            Err(e) => warn!(error = %e, "computed etag is not a valid header value"),
        }
    }

    if let Some(status) = pending_status {
        channel.write_status(status);
    }
    if !body.is_empty() {
        channel.write_body(&body);
    }
    channel
}
