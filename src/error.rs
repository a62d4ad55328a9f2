//! Unified error type.

use thiserror::Error;

use crate::config::ConfigError;

/// The error type returned by quire's fallible startup operations.
///
/// Request-level failures never surface here: a bad request becomes a `400`,
/// a failed handler goes through the error-handler chain. This type covers
/// infrastructure: parsing the bind address, binding the port, loading
/// settings.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}
