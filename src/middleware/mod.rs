//! Middleware layer.
//!
//! Cross-cutting concerns applied by [`Router::handle`](crate::Router::handle)
//! around every request, in this order:
//!
//! 1. [`request_id`]: reuse or mint an `x-request-id`
//! 2. [`trace`]: per-request span, access-log line on the way out
//! 3. [`method_override`]: let HTML forms reach `PUT`/`PATCH`/`DELETE` routes

pub mod method_override;
pub mod request_id;
pub mod trace;
