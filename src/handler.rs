//! Handler trait, the per-request [`Exchange`], and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, so each one
//! is hidden behind a trait object (`dyn ErasedHandler`).
//!
//! A handler borrows the exchange mutably for as long as its future runs:
//!
//! ```text
//! async fn show(ex: &mut Exchange) -> anyhow::Result<()> { … }  ← user writes this
//!        ↓ pipeline.wrap(show)
//! show.into_boxed_handler()                  ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                  ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut exchange)  at request time
//!        ↓
//! Box::pin(show(&mut exchange))              ← BoxFuture<'a>, borrows the exchange
//! ```
//!
//! The returned future's type depends on the borrow's lifetime, which a plain
//! `F: Fn(&mut Exchange) -> Fut` bound cannot express (the same `Fut` would
//! have to work for every lifetime). [`HandlerFn`] names the future per
//! lifetime instead, and `for<'a> HandlerFn<'a>` asks for all of them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::params::{Params, Upload};
use crate::request::Request;
use crate::response::BufferedResponse;

/// Everything a handler gets for one request.
///
/// Dropping the handler's future (client gone, server shutting down) is how
/// a request is cancelled.
pub struct Exchange {
    pub request: Request,
    pub params: Params,
    /// File parts of a multipart body, in body order.
    pub uploads: Vec<Upload>,
    pub response: BufferedResponse,
}

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased handler future borrowing the exchange.
pub(crate) type BoxFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Internal dispatch interface.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call<'a>(&'a self, ex: &'a mut Exchange) -> BoxFuture<'a>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public traits ─────────────────────────────────────────────────────────────

/// An async function over `&'a mut Exchange` whose future lives for `'a`.
///
/// Implemented automatically; see [`Handler`].
pub trait HandlerFn<'a>: Send + Sync + 'static {
    type Future: Future<Output = anyhow::Result<()>> + Send + 'a;

    fn invoke(&self, ex: &'a mut Exchange) -> Self::Future;
}

impl<'a, F, Fut> HandlerFn<'a> for F
where
    F: Fn(&'a mut Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'a,
{
    type Future = Fut;

    fn invoke(&self, ex: &'a mut Exchange) -> Fut {
        self(ex)
    }
}

/// Implemented for every valid business handler.
///
/// You never implement this yourself. Any `async fn` of the shape
///
/// ```text
/// async fn name(ex: &mut Exchange) -> anyhow::Result<()>
/// ```
///
/// satisfies it. Returning `Err` hands the error to the pipeline's error
/// handlers; whatever the handler already wrote is thrown away first.
///
/// Sealed, so only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where F: for<'a> HandlerFn<'a> {}

impl<F> Handler for F
where
    F: for<'a> HandlerFn<'a>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'a> HandlerFn<'a>,
{
    fn call<'a>(&'a self, ex: &'a mut Exchange) -> BoxFuture<'a> {
        Box::pin(self.0.invoke(ex))
    }
}
