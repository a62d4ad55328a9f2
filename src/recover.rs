//! Recovering from a failed business handler.
//!
//! When a handler returns `Err`, the partial body it wrote is discarded and
//! the configured [`ErrorHandler`]s are tried in order:
//!
//! | handler returns | chain does |
//! |---|---|
//! | `Ok(true)`  | stop; finalize whatever the handler wrote |
//! | `Ok(false)` | try the next one |
//! | `Err(_)`    | stop; generic `500` straight to the channel |
//!
//! Falling off the end of the list is the same as `Err`: generic `500`.
//! The client never sees the original error, only the fixed body.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error};

use crate::request::Request;
use crate::response::{BufferedResponse, ResponseWriter, http_error};

pub(crate) const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// One recovery strategy.
///
/// The writer handed in is the request's buffered sink, so a handled error
/// response is content-sniffed and ETagged like any other.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(
        &self,
        res: &mut dyn ResponseWriter,
        req: &Request,
        err: &anyhow::Error,
    ) -> anyhow::Result<bool>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut dyn ResponseWriter, &Request, &anyhow::Error) -> anyhow::Result<bool>
        + Send
        + Sync
        + 'static,
{
    fn handle(
        &self,
        res: &mut dyn ResponseWriter,
        req: &Request,
        err: &anyhow::Error,
    ) -> anyhow::Result<bool> {
        self(res, req, err)
    }
}

/// Logs the error and answers `500 Internal Server Error`. Always handles.
///
/// Put it last in a chain to keep the log line while still ending on a
/// plain 500.
#[derive(Clone, Copy, Debug, Default)]
pub struct InternalServerError;

impl ErrorHandler for InternalServerError {
    fn handle(
        &self,
        res: &mut dyn ResponseWriter,
        req: &Request,
        err: &anyhow::Error,
    ) -> anyhow::Result<bool> {
        error!(method = %req.method(), path = req.path(), error = %err, "internal server error");
        http_error(res, StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
        Ok(true)
    }
}

/// Ordered list of strategies.
#[derive(Clone, Default)]
pub(crate) struct ErrorChain {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

/// Outcome of running the chain.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Recovery {
    /// A handler took care of it; finalize the sink as usual.
    Handled,
    /// Nobody did (or one failed); emit the generic 500.
    Unhandled,
}

impl ErrorChain {
    pub(crate) fn push(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.handlers.push(handler);
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn run(&self, res: &mut BufferedResponse, req: &Request, err: &anyhow::Error) -> Recovery {
        res.reset();

        for (index, handler) in self.handlers.iter().enumerate() {
            match handler.handle(&mut *res, req, err) {
                Ok(true) => {
                    debug!(index, "error handled");
                    return Recovery::Handled;
                }
                Ok(false) => {}
                Err(handler_err) => {
                    error!(index, error = %handler_err, original = %err, "error handler failed");
                    return Recovery::Unhandled;
                }
            }
        }

        error!(error = %err, handlers = self.handlers.len(), "unhandled handler error");
        Recovery::Unhandled
    }
}
