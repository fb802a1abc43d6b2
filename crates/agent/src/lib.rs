//! Agent: the origin-side half of the reverse tunnel.
//!
//! The agent dials out to the broker's tunnel listener and keeps that
//! connection alive forever, redialing after every loss. Request envelopes
//! arriving over the tunnel are resolved to target URLs (default-target
//! resolution plus first-match rewrite rules), issued against the real
//! origin, and answered with response envelopes over the same socket.

mod error;
pub mod rewrite;
pub mod tunnel;
mod upstream;

pub use error::AgentError;
pub use rewrite::RewriteRules;

pub type Result<T> = std::result::Result<T, AgentError>;
