//! Runtime settings, read from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:3000"
//!
//! [params]
//! max_body = 8388608
//! multipart_limit = 5242880
//!
//! [etag]
//! digest_filter = '<input type="hidden" name="csrf_token" value="[^"]+">'
//!
//! [pool]
//! max_idle = 64
//! max_retained_capacity = 1048576
//!
//! [log]
//! filter = "info,quire=debug"
//! ```
//!
//! Loading is two passes: serde checks shape, [`Settings::validate`] checks
//! meaning (the filter compiles, the address parses, limits are non-zero).

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::params::{DEFAULT_BODY_LIMIT, DEFAULT_MULTIPART_LIMIT, Limits};
use crate::pool::{DEFAULT_MAX_IDLE, DEFAULT_MAX_RETAINED_CAPACITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub params: ParamsSettings,
    pub etag: EtagSettings,
    pub pool: PoolSettings,
    pub log: LogSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1:3000".to_owned() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsSettings {
    /// Largest accepted request body, in bytes.
    pub max_body: usize,
    /// Largest accepted `multipart/form-data` body, in bytes.
    pub multipart_limit: usize,
}

impl Default for ParamsSettings {
    fn default() -> Self {
        Self { max_body: DEFAULT_BODY_LIMIT, multipart_limit: DEFAULT_MULTIPART_LIMIT }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtagSettings {
    /// Regex whose matches are left out of the ETag digest.
    pub digest_filter: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_idle: usize,
    pub max_retained_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_idle: DEFAULT_MAX_IDLE, max_retained_capacity: DEFAULT_MAX_RETAINED_CAPACITY }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// `tracing-subscriber` `EnvFilter` directive; `RUST_LOG` wins if set.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_owned() }
    }
}

impl Settings {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.params.max_body == 0 {
            return Err(ConfigError::Invalid {
                field: "params.max_body",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.params.multipart_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "params.multipart_limit",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if let Some(pattern) = &self.etag.digest_filter {
            regex::bytes::Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                field: "etag.digest_filter",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits { body: self.params.max_body, multipart: self.params.multipart_limit }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            field: "server.bind_addr",
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(settings.params.multipart_limit, 5 * 1024 * 1024);
        assert!(settings.etag.digest_filter.is_none());
        assert_eq!(settings.log.filter, "info");
        assert_eq!(settings.limits(), Limits::default());
    }

    #[test]
    fn pool_defaults_match_the_pool() {
        let settings = Settings::default();
        assert_eq!(settings.pool.max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(settings.pool.max_retained_capacity, DEFAULT_MAX_RETAINED_CAPACITY);
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let err = Settings::from_toml_str("[params]\nmax_body = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "params.max_body", .. }));
    }

    #[test]
    fn sections_override_defaults() {
        let toml = r#"
            [server]
            bind_addr = "0.0.0.0:8080"

            [params]
            max_body = 4096
            multipart_limit = 1024

            [etag]
            digest_filter = 'value="[^"]+"'
        "#;
        let settings = Settings::from_toml_str(toml).unwrap();
        assert_eq!(settings.bind_addr().unwrap().port(), 8080);
        assert_eq!(settings.limits(), Limits { body: 4096, multipart: 1024 });
        assert_eq!(settings.etag.digest_filter.as_deref(), Some(r#"value="[^"]+""#));
        assert_eq!(settings.pool.max_idle, 64);
    }

    #[test]
    fn bad_regex_is_rejected() {
        let err = Settings::from_toml_str("[etag]\ndigest_filter = '(unclosed'").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "etag.digest_filter", .. }));
    }

    #[test]
    fn zero_multipart_limit_is_rejected() {
        let err = Settings::from_toml_str("[params]\nmultipart_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "params.multipart_limit", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Settings::from_toml_str("[server]\nport = 80"),
            Err(ConfigError::Parse(_))
        ));
    }
}
