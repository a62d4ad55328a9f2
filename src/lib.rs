//! # quire
//!
//! A small HTTP layer for server-rendered apps: each handler writes into a
//! buffer, and nothing goes on the wire until the handler is done.
//!
//! ## Why buffer everything
//!
//! Two features need the complete body before the first byte is sent:
//!
//! - **Late errors.** A handler can fail after it has started rendering. The
//!   half-written page is thrown away and the error-handler chain writes
//!   something else in its place.
//! - **Automatic ETags.** The body's SHA-256 becomes a weak `ETag`, and a
//!   matching `If-None-Match` turns the response into a bodiless `304`. A
//!   digest filter can cut volatile spans (anti-forgery tokens) out of the
//!   hash so a form page can still validate as unchanged.
//!
//! A third job sits in the same per-request pipeline: route captures, the
//! query string, and a JSON, urlencoded or multipart body are merged into one
//! [`Params`] map before the handler runs.
//!
//! Streaming responses are out of scope; everything is buffered.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::fmt::Write as _;
//!
//! use quire::{Exchange, Pipeline, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quire::Error> {
//!     let app = Pipeline::builder()
//!         .error_strategy(quire::InternalServerError)
//!         .build();
//!
//!     let router = Router::new()
//!         .get("/books/{id}", app.wrap(show_book));
//!
//!     Server::bind("0.0.0.0:3000")?.serve(router).await
//! }
//!
//! async fn show_book(ex: &mut Exchange) -> anyhow::Result<()> {
//!     let id: i64 = ex.params.parse("id")?;
//!     write!(ex.response, "<h1>Book {id}</h1>")?;
//!     Ok(())
//! }
//! ```

mod error;
mod etag;
mod handler;
mod params;
mod pipeline;
mod pool;
mod recover;
mod request;
mod response;
mod router;
mod server;
mod sniff;

pub mod config;
pub mod middleware;

pub use config::{ConfigError, Settings};
pub use error::Error;
pub use etag::{DigestFilter, digest};
pub use handler::{Exchange, Handler, HandlerFn};
pub use params::{
    DEFAULT_BODY_LIMIT, DEFAULT_MULTIPART_LIMIT, Limits, Merged, ParamError, ParamValue, Params, ParamsError, Upload,
    merge,
};
pub use pipeline::{Endpoint, Pipeline, PipelineBuilder};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use recover::{ErrorHandler, InternalServerError};
pub use request::Request;
pub use response::{BufferedResponse, Channel, ContentType, ResponseWriter, http_error};
pub use router::Router;
pub use server::Server;
pub use sniff::detect_content_type;
