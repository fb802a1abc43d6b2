use thiserror::Error;

/// Errors that end or prevent a tunnel session. Per-request upstream
/// failures are not here — those become synthetic 500 response envelopes
/// and never unwind the loop.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid rewrite pattern '{pattern}': {source}")]
    Rewrite {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid default target '{url}': {source}")]
    DefaultTarget {
        url: String,
        source: url::ParseError,
    },

    #[error("broker host '{0}' is not a valid TLS server name")]
    ServerName(String),

    #[error("failed to build upstream client: {0}")]
    UpstreamClient(#[from] reqwest::Error),

    #[error(transparent)]
    Tls(#[from] backhaul_common::ConfigError),

    #[error("protocol error: {0}")]
    Proto(#[from] backhaul_proto::ProtoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
