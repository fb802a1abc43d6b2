//! Shared pieces used by both backhaul processes: the configuration tree
//! with its JSON loader, and TLS material handling for the listeners and
//! the agent's tunnel dial.

pub mod config;
mod error;
pub mod tls;

pub use config::Config;
pub use error::{ConfigError, Result};
