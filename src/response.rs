//! The response side of a request: the real channel and the buffered sink
//! that stands in front of it.
//!
//! ```text
//! handler ──write_body──▶ BufferedResponse ──(finalize)──▶ Channel ──▶ hyper
//!         ──write_status─▶   pending_status
//!         ──headers_mut──────────────────────────────────▶ Channel headers
//! ```
//!
//! Headers pass straight through to the [`Channel`]. Only the body and the
//! status are held back, because the final status can still change (a `304`
//! decided from the finished body, or a `500` after a late failure).

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;
use tracing::warn;

use crate::pool::PooledBuffer;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`ResponseWriter::set_content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The write surface handlers and error handlers see.
///
/// Implemented by the real [`Channel`] and by [`BufferedResponse`], so an
/// error handler written against `&mut dyn ResponseWriter` does not care
/// which one it was given.
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn write_status(&mut self, status: StatusCode);
    fn write_body(&mut self, bytes: &[u8]);

    fn set_content_type(&mut self, content_type: ContentType) {
        self.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    /// Sets `text/plain; charset=utf-8` and appends `body`.
    fn text(&mut self, body: &str) {
        self.set_content_type(ContentType::Text);
        self.write_body(body.as_bytes());
    }

    /// Sets `text/html; charset=utf-8` and appends `body`.
    fn html(&mut self, body: &str) {
        self.set_content_type(ContentType::Html);
        self.write_body(body.as_bytes());
    }
}

/// Writes a plain-text error reply: status, `text/plain`, `nosniff`, and
/// `message` followed by a newline.
pub fn http_error(w: &mut dyn ResponseWriter, status: StatusCode, message: &str) {
    let headers = w.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    w.write_status(status);
    w.write_body(message.as_bytes());
    w.write_body(b"\n");
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// The real response, as the transport will send it.
///
/// Write-once semantics for the status line: the first status written
/// sticks, and the first body write commits an implicit `200 OK` if no status
/// came before it.
#[derive(Debug, Default)]
pub struct Channel {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Converts into the hyper-facing response. An uncommitted status becomes
    /// `200 OK`, the transport default.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for Channel {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn write_status(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(committed) => {
                warn!(%committed, ignored = %status, "superfluous write_status call");
            }
        }
    }

    fn write_body(&mut self, bytes: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(bytes);
    }
}

// ── BufferedResponse ──────────────────────────────────────────────────────────

/// The sink a handler writes into.
///
/// Nothing reaches the [`Channel`] body until the pipeline finalizes: body
/// bytes land in a pooled buffer and the requested status is only recorded.
pub struct BufferedResponse {
    channel: Channel,
    body: PooledBuffer,
    pending_status: Option<StatusCode>,
}

impl BufferedResponse {
    pub(crate) fn new(channel: Channel, body: PooledBuffer) -> Self {
        Self { channel, body, pending_status: None }
    }

    /// Discards the buffered body. Headers are left as they are.
    pub fn reset(&mut self) {
        self.body.clear();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The status the handler asked for, not yet applied.
    pub fn pending_status(&self) -> Option<StatusCode> {
        self.pending_status
    }

    /// Takes the channel back, returning the body buffer to its pool.
    pub(crate) fn into_channel(self) -> Channel {
        self.channel
    }

    /// Splits into the channel and the still-pending body and status.
    pub(crate) fn into_parts(self) -> (Channel, PooledBuffer, Option<StatusCode>) {
        (self.channel, self.body, self.pending_status)
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers(&self) -> &HeaderMap { self.channel.headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { self.channel.headers_mut() }

    fn write_status(&mut self, status: StatusCode) {
        self.pending_status = Some(status);
    }

    fn write_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }
}

impl fmt::Write for BufferedResponse {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_body(s.as_bytes());
        Ok(())
    }
}
