//! Wire protocol for the backhaul reverse tunnel.
//!
//! Every message on a tunnel socket is one *frame*:
//!
//! ```text
//! [len:4 big-endian][payload:len]
//! ```
//!
//! The payload of each frame is one *envelope*: a self-describing JSON
//! record that is either a request travelling broker → agent or a response
//! travelling agent → broker. Bodies are carried as base64 text inside the
//! envelope, so a frame never contains raw binary outside the JSON payload.
//!
//! The frame codec is payload-agnostic; the envelope codec handles exactly
//! one payload at a time. Keeping the two layers separate means the broker
//! can tear down a connection on framing violations (an unrecoverable
//! stream corruption) while treating malformed envelopes as skippable.

pub mod envelope;
pub mod frame;

pub use envelope::{Envelope, Headers, RequestEnvelope, ResponseEnvelope};
pub use frame::FrameDecoder;

use thiserror::Error;

/// Default cap on a single frame's payload length: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Errors produced by the frame and envelope codecs.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// An inbound frame header announced a payload larger than the
    /// configured maximum. The stream is corrupt beyond recovery and the
    /// connection must be torn down.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// An outbound payload does not fit in the 32-bit length prefix.
    #[error("payload of {0} bytes does not fit in a frame")]
    Oversize(usize),

    /// A frame payload was not a valid envelope. Not fatal to the socket;
    /// the frame is skipped.
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
