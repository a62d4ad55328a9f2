//! One parameter map from every place a request carries data.
//!
//! Sources are applied lowest precedence first, each overwriting the keys it
//! shares with the ones before it:
//!
//! 1. route captures (`/books/{id}`)
//! 2. the query string
//! 3. the body, picked by `Content-Type`: JSON object, urlencoded form, or
//!    the text fields of a `multipart/form-data` body
//!
//! For query and form pairs a key ending in `[]` collects every value given
//! for it into a [`ParamValue::List`] under the key without the marker
//! (`tags[]=a&tags[]=b` → `tags = ["a", "b"]`). Any other repeated key keeps
//! its first value.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use mime::Mime;
use multer::{Constraints, Multipart, SizeLimit};
use serde_json::Value;
use thiserror::Error;
use url::form_urlencoded;

use crate::request::Request;

/// Default ceiling for a `multipart/form-data` body: 5 MiB.
pub const DEFAULT_MULTIPART_LIMIT: usize = 5 * 1024 * 1024;

/// Default ceiling for any other request body: 8 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

const ARRAY_MARKER: &str = "[]";

/// A parameter is either one string or an ordered list of them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::Scalar(_) => None,
            Self::List(items) => Some(items),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self { Self::Scalar(s.to_owned()) }
}

impl From<Vec<String>> for ParamValue {
    fn from(items: Vec<String>) -> Self { Self::List(items) }
}

/// The merged parameters of one request, ordered by key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(BTreeMap<String, ParamValue>);

/// Failure of [`Params::parse`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParamError {
    #[error("missing parameter `{0}`")]
    Missing(String),
    #[error("parameter `{key}` has unparsable value `{value}`")]
    Invalid { key: String, value: String },
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// The value of `key` if it is a scalar.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_scalar)
    }

    /// The value of `key` if it is a list.
    pub fn list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(ParamValue::as_list)
    }

    /// Parses a scalar parameter, e.g. a numeric route id.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<T, ParamError> {
        let value = self.scalar(key).ok_or_else(|| ParamError::Missing(key.to_owned()))?;
        value.parse().map_err(|_| ParamError::Invalid {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Applies query or form pairs with the `[]` list convention.
    fn apply_pairs<'a>(&mut self, pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            grouped.entry(key.into_owned()).or_default().push(value.into_owned());
        }

        for (key, values) in grouped {
            match key.strip_suffix(ARRAY_MARKER) {
                Some(name) => {
                    self.0.insert(name.to_owned(), ParamValue::List(values));
                }
                None => {
                    if let Some(first) = values.into_iter().next() {
                        self.0.insert(key, ParamValue::Scalar(first));
                    }
                }
            }
        }
    }
}

/// A file part of a multipart body. Not part of [`Params`].
#[derive(Clone, Debug)]
pub struct Upload {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Everything [`merge`] extracted from a request.
#[derive(Debug, Default)]
pub struct Merged {
    pub params: Params,
    pub uploads: Vec<Upload>,
}

/// Body-size ceilings, in bytes.
///
/// `body` caps every request body; `multipart` is the tighter ceiling for
/// `multipart/form-data`. The server applies both while reading the body off
/// the connection, and [`merge`] checks them again for requests built by hand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    pub body: usize,
    pub multipart: usize,
}

impl Limits {
    /// The ceiling for a body of `content_type`.
    pub fn for_content_type(&self, content_type: Option<&str>) -> usize {
        let is_multipart = content_type
            .and_then(|ct| ct.parse::<Mime>().ok())
            .is_some_and(|m| m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA);
        if is_multipart { self.multipart.min(self.body) } else { self.body }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self { body: DEFAULT_BODY_LIMIT, multipart: DEFAULT_MULTIPART_LIMIT }
    }
}

/// A request whose data could not be normalized. Always the client's fault.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("malformed json body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed form body: {0}")]
    Form(String),
    #[error("malformed multipart body: {0}")]
    Multipart(multer::Error),
    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
}

/// Builds the parameter map for `req`.
///
/// Reads the body at most once; call it once per request.
pub async fn merge(req: &Request, limits: &Limits) -> Result<Merged, ParamsError> {
    let mut merged = Merged::default();

    for (key, value) in req.route_params() {
        merged.params.insert(key.as_str(), value.as_str());
    }

    if let Some(query) = req.query() {
        // segments carrying a `;` are dropped, not split
        let pairs = query
            .split('&')
            .filter(|segment| !segment.contains(';'))
            .flat_map(|segment| form_urlencoded::parse(segment.as_bytes()));
        merged.params.apply_pairs(pairs);
    }

    let content_type = req.header(CONTENT_TYPE.as_str());
    let limit = limits.for_content_type(content_type);
    if req.body().len() > limit {
        return Err(ParamsError::PayloadTooLarge { limit });
    }

    let Some(content_type) = content_type else {
        return Ok(merged);
    };
    let Ok(parsed) = content_type.parse::<Mime>() else {
        return Ok(merged);
    };

    let (ty, subtype) = (parsed.type_(), parsed.subtype());
    if ty == mime::APPLICATION && subtype == mime::JSON {
        merge_json(&mut merged.params, req.body())?;
    } else if ty == mime::APPLICATION && subtype == mime::WWW_FORM_URLENCODED {
        validate_form(req.body())?;
        merged.params.apply_pairs(form_urlencoded::parse(req.body()));
    } else if ty == mime::MULTIPART && subtype == mime::FORM_DATA {
        merged.uploads = merge_multipart(&mut merged.params, content_type, req.body(), limits).await?;
    }

    Ok(merged)
}

fn merge_json(params: &mut Params, body: &[u8]) -> Result<(), ParamsError> {
    // The first value is decoded and anything after it is ignored.
    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<serde_json::Map<String, Value>>();
    let object = match values.next() {
        Some(object) => object?,
        None => {
            let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
            return Err(ParamsError::Json(serde_json::Error::io(eof)));
        }
    };
    for (key, value) in object {
        match value {
            Value::Null => {
                params.remove(&key);
            }
            Value::Array(items) => {
                params.insert(key, ParamValue::List(items.into_iter().map(json_text).collect()));
            }
            other => params.insert(key, ParamValue::Scalar(json_text(other))),
        }
    }
    Ok(())
}

// Numbers keep their source text (serde_json is built with
// `arbitrary_precision`), so `12345678901234567890.5` survives unchanged.
fn json_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Rejects `%` not followed by two hex digits, and `;` used as a separator.
fn validate_form(body: &[u8]) -> Result<(), ParamsError> {
    if let Some(at) = body.iter().position(|&b| b == b';') {
        return Err(ParamsError::Form(format!("invalid semicolon separator at byte {at}")));
    }
    let mut from = 0;
    while let Some(offset) = body[from..].iter().position(|&b| b == b'%') {
        let at = from + offset;
        let escape_ok = body
            .get(at + 1..at + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !escape_ok {
            return Err(ParamsError::Form(format!("invalid percent escape at byte {at}")));
        }
        from = at + 3;
    }
    Ok(())
}

async fn merge_multipart(
    params: &mut Params,
    content_type: &str,
    body: &Bytes,
    limits: &Limits,
) -> Result<Vec<Upload>, ParamsError> {
    let boundary = multer::parse_boundary(content_type).map_err(ParamsError::Multipart)?;
    let body = body.clone();
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let constraints = Constraints::new()
        .size_limit(SizeLimit::new().whole_stream(limits.for_content_type(Some(content_type)) as u64));
    let mut multipart = Multipart::with_constraints(stream, boundary, constraints);

    let mut fields: Vec<(Cow<'static, str>, Cow<'static, str>)> = Vec::new();
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(ToString::to_string);
            let data = field.bytes().await.map_err(multipart_error)?;
            uploads.push(Upload { field: name, file_name, content_type, data });
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            fields.push((Cow::Owned(name), Cow::Owned(text)));
        }
    }

    params.apply_pairs(fields.into_iter());
    Ok(uploads)
}

fn multipart_error(e: multer::Error) -> ParamsError {
    match e {
        multer::Error::StreamSizeExceeded { limit } => ParamsError::PayloadTooLarge {
            limit: limit as usize,
        },
        other => ParamsError::Multipart(other),
    }
}
