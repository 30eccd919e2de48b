//! Error types for modemwire.

use thiserror::Error;

/// Main error type for all modemwire operations.
///
/// Remote (modem-reported) failures are deliberately *not* represented here:
/// a nonzero error code in a solicited response is a semantic result, mapped
/// to [`RemoteError`](crate::protocol::RemoteError) and surfaced to the
/// request's caller through the event bus. `Error` covers local faults only.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the modem channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed field content (bad hex nibble, truncated record,
    /// unexpected tag). Recovered per-record: the affected exchange is
    /// abandoned, the session continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// Structural wire-protocol violation (invalid length prefix,
    /// out-of-range seek, reassembly shape mismatch).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Modem channel closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Shorthand for an [`Error::Decode`] with an owned message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Shorthand for an [`Error::Protocol`] with an owned message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
