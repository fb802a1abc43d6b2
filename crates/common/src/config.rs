//! Configuration tree for both processes.
//!
//! A single JSON file configures broker and agent alike; each process reads
//! the sections it cares about. Every key is optional — the file is decoded
//! over the defaults below, so an empty `{}` yields a fully working local
//! setup (broker HTTP on :3000, tunnel on :3001, agent dialing
//! localhost:3001).

use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Default cap on a single frame's payload length: 16 MiB.
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Top-level configuration, decoded from a JSON file over defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub reconnection: ReconnectionConfig,
    /// Broker-side deadline for each in-flight request, in milliseconds.
    pub request_timeout: u64,
    /// Upper bound on a single frame's payload length, in bytes.
    pub max_frame_bytes: usize,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            reconnection: ReconnectionConfig::default(),
            request_timeout: 30_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, filling absent keys from
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Broker-side listener settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpListenerConfig,
    pub socket: SocketListenerConfig,
}

/// The public HTTP(S) listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpListenerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: ListenerTlsConfig,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            ssl: ListenerTlsConfig::default(),
        }
    }
}

impl HttpListenerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The framed tunnel listener agents dial into.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketListenerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: ListenerTlsConfig,
}

impl Default for SocketListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            ssl: ListenerTlsConfig::default(),
        }
    }
}

impl SocketListenerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Server key/cert pair for a listener. Both listeners may enable TLS
/// independently.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerTlsConfig {
    pub enabled: bool,
    pub key: String,
    pub cert: String,
}

impl Default for ListenerTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: "server.key".into(),
            cert: "server.crt".into(),
        }
    }
}

/// Agent-side settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: TunnelTargetConfig,
    pub proxy: ProxyConfig,
}

/// Where the agent dials to reach the broker's tunnel listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelTargetConfig {
    pub host: String,
    pub port: u16,
    pub ssl: TunnelTlsConfig,
}

impl Default for TunnelTargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3001,
            ssl: TunnelTlsConfig::default(),
        }
    }
}

impl TunnelTargetConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS settings for the tunnel dial.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TunnelTlsConfig {
    pub enabled: bool,
    /// CA bundle to verify the broker against.
    pub ca: String,
    /// When false, accept any broker certificate.
    pub reject_unauthorized: bool,
}

impl Default for TunnelTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ca: "ca.crt".into(),
            reject_unauthorized: true,
        }
    }
}

/// How the agent resolves and issues upstream requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Base URL that relative request URLs are resolved against.
    pub default_target: String,
    pub ssl: UpstreamTlsConfig,
    /// Ordered rewrite rules; the first matching pattern wins.
    pub rewrite_rules: Vec<RewriteRule>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_target: "http://example.com".into(),
            ssl: UpstreamTlsConfig::default(),
            rewrite_rules: Vec::new(),
        }
    }
}

/// TLS verification policy for upstream origin calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamTlsConfig {
    pub reject_unauthorized: bool,
}

impl Default for UpstreamTlsConfig {
    fn default() -> Self {
        Self {
            reject_unauthorized: true,
        }
    }
}

/// One URL rewrite rule: a regex pattern and its replacement.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

/// Agent redial behavior after losing the tunnel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Delay between redial attempts, in milliseconds.
    pub delay: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self { delay: 5000 }
    }
}

/// Process-wide logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: "proxy.log".into(),
        }
    }
}
