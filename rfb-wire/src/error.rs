//! Error taxonomy for the RFB engine.
//!
//! Every failure in the engine maps to one of six kinds. All of them except
//! [`RfbError::Cancelled`] are fatal to the connection: the reader task
//! reports the error once, raises the quit signal, and exits. There is no
//! internal retry; the caller reconnects by establishing a new session.

use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Engine-wide error kinds.
#[derive(Debug, Error)]
pub enum RfbError {
    /// Underlying stream read/write failed, short read, or peer closed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed framing, unknown message type, or impossible field values.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A pixel format or codec path not implemented for this build.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Server refused the chosen security type or authentication failed.
    #[error("security rejected: {0}")]
    SecurityRejected(String),

    /// A zlib stream was corrupt or disagreed with the expected byte count.
    #[error("decompression failure: {0}")]
    Decompression(String),

    /// The consumer closed the connection; a clean shutdown, not an error.
    #[error("cancelled by consumer")]
    Cancelled,
}

impl RfbError {
    /// Build a [`RfbError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Build a [`RfbError::UnsupportedFormat`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Build a [`RfbError::SecurityRejected`].
    pub fn security(msg: impl Into<String>) -> Self {
        Self::SecurityRejected(msg.into())
    }

    /// Build a [`RfbError::Decompression`].
    pub fn decompression(msg: impl Into<String>) -> Self {
        Self::Decompression(msg.into())
    }

    /// Everything except consumer-triggered cancellation tears the
    /// connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
