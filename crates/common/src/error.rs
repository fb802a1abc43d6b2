use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration or TLS material. All of these
/// are fatal at startup; nothing here occurs on a per-request path.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to read TLS material {path}: {source}")]
    TlsRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TLS material in {path}: {reason}")]
    TlsInvalid { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
