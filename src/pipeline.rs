//! Wrapping business handlers in the buffered-response pipeline.
//!
//! One request through an [`Endpoint`]:
//!
//! ```text
//! params::merge ──Err──▶ 400 Bad Request                     (handler never runs)
//!      │ Ok
//!      ▼
//! handler(&mut Exchange) ──Err──▶ ErrorChain ──Unhandled──▶ 500 Internal Server Error
//!      │ Ok                          │ Handled
//!      ▼                             ▼
//! etag::finalize: sniff Content-Type → ETag / 304 → status + body to the channel
//! ```
//!
//! The 400 and 500 paths write straight to the real channel and skip
//! finalization. A panic in the handler or in an error handler is caught and
//! answered with the same generic 500; the body buffer still goes back to
//! its pool.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt as _;
use http::StatusCode;
use http_body_util::Full;
use regex::bytes::Regex;
use tracing::{debug, error};

use crate::config::Settings;
use crate::etag::{self, DigestFilter};
use crate::handler::{BoxedHandler, Exchange, Handler};
use crate::params::{self, Limits};
use crate::pool::BufferPool;
use crate::recover::{ErrorChain, ErrorHandler, INTERNAL_ERROR_BODY, Recovery};
use crate::request::Request;
use crate::response::{BufferedResponse, Channel, ResponseWriter, http_error};

const BAD_REQUEST_BODY: &str = "Bad Request";

/// Shared configuration for a family of handlers.
///
/// Immutable once built. Wrap handlers with [`Pipeline::wrap`]; every
/// resulting [`Endpoint`] shares this configuration through an `Arc`.
pub struct Pipeline {
    errors: ErrorChain,
    digest_filter: Option<DigestFilter>,
    limits: Limits,
    pool: BufferPool,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            errors: ErrorChain::default(),
            digest_filter: None,
            limits: Limits::default(),
            pool: None,
        }
    }

    /// A pipeline configured from [`Settings`]. Error handlers are added on
    /// the returned builder.
    pub fn from_settings(settings: &Settings) -> Result<PipelineBuilder, regex::Error> {
        let mut builder = Self::builder()
            .limits(settings.limits())
            .buffer_pool(BufferPool::with_limits(
                settings.pool.max_idle,
                settings.pool.max_retained_capacity,
            ));
        if let Some(pattern) = &settings.etag.digest_filter {
            builder = builder.digest_filter(Regex::new(pattern)?);
        }
        Ok(builder)
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Wraps `handler`. Call this once per route at startup.
    pub fn wrap(self: &Arc<Self>, handler: impl Handler) -> Endpoint {
        Endpoint {
            pipeline: Arc::clone(self),
            handler: handler.into_boxed_handler(),
        }
    }
}

/// Fluent builder for [`Pipeline`].
pub struct PipelineBuilder {
    errors: ErrorChain,
    digest_filter: Option<DigestFilter>,
    limits: Limits,
    pool: Option<BufferPool>,
}

impl PipelineBuilder {
    /// Appends a closure to the error-handler chain.
    pub fn error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut dyn ResponseWriter, &Request, &anyhow::Error) -> anyhow::Result<bool>
            + Send
            + Sync
            + 'static,
    {
        self.error_strategy(handler)
    }

    /// Appends any [`ErrorHandler`] to the chain.
    pub fn error_strategy(mut self, handler: impl ErrorHandler) -> Self {
        self.errors.push(Arc::new(handler));
        self
    }

    /// Spans matching `pattern` are left out of the automatic ETag digest.
    pub fn digest_filter(mut self, pattern: Regex) -> Self {
        self.digest_filter = Some(DigestFilter::new(pattern));
        self
    }

    /// Ceiling for every request body. Defaults to
    /// [`DEFAULT_BODY_LIMIT`](crate::params::DEFAULT_BODY_LIMIT).
    pub fn max_body(mut self, bytes: usize) -> Self {
        self.limits.body = bytes;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Ceiling for `multipart/form-data` bodies. Defaults to
    /// [`DEFAULT_MULTIPART_LIMIT`](crate::params::DEFAULT_MULTIPART_LIMIT).
    pub fn multipart_limit(mut self, bytes: usize) -> Self {
        self.limits.multipart = bytes;
        self
    }

    /// Shares `pool` instead of creating a fresh one.
    pub fn buffer_pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        debug!(
            error_handlers = self.errors.len(),
            digest_filter = self.digest_filter.as_ref().map(DigestFilter::as_str),
            max_body = self.limits.body,
            multipart_limit = self.limits.multipart,
            "pipeline built"
        );
        Arc::new(Pipeline {
            errors: self.errors,
            digest_filter: self.digest_filter,
            limits: self.limits,
            pool: self.pool.unwrap_or_default(),
        })
    }
}

/// A business handler bound to its [`Pipeline`]. Register it on a
/// [`Router`](crate::Router), or call [`Endpoint::serve`] directly.
#[derive(Clone)]
pub struct Endpoint {
    pipeline: Arc<Pipeline>,
    handler: BoxedHandler,
}

impl Endpoint {
    /// Runs one request through the whole pipeline.
    pub async fn serve(&self, request: Request) -> http::Response<Full<Bytes>> {
        self.run(request).await.into_response()
    }

    async fn run(&self, request: Request) -> Channel {
        let pipeline = &self.pipeline;
        // Held for the whole request; dropping the response returns it.
        let buffer = pipeline.pool.acquire();
        let mut channel = Channel::new();

        let merged = match params::merge(&request, &pipeline.limits).await {
            Ok(merged) => merged,
            Err(e) => {
                debug!(error = %e, "rejecting request parameters");
                http_error(&mut channel, StatusCode::BAD_REQUEST, BAD_REQUEST_BODY);
                return channel;
            }
        };

        let mut ex = Exchange {
            request,
            params: merged.params,
            uploads: merged.uploads,
            response: BufferedResponse::new(channel, buffer),
        };

        let outcome = AssertUnwindSafe(self.handler.call(&mut ex)).catch_unwind().await;
        let recovery = match outcome {
            Ok(Ok(())) => Recovery::Handled,
            Ok(Err(err)) => {
                let Exchange { request, response, .. } = &mut ex;
                let errors = &pipeline.errors;
                panic::catch_unwind(AssertUnwindSafe(|| errors.run(response, request, &err)))
                    .unwrap_or_else(|payload| {
                        error!(panic = panic_message(&*payload), "error handler panicked");
                        Recovery::Unhandled
                    })
            }
            Err(payload) => {
                error!(panic = panic_message(&*payload), "handler panicked");
                Recovery::Unhandled
            }
        };

        if recovery == Recovery::Unhandled {
            let mut channel = ex.response.into_channel();
            http_error(&mut channel, StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
            return channel;
        }

        etag::finalize(ex.response, &ex.request, pipeline.digest_filter.as_ref())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
