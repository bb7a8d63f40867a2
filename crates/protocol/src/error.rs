//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Framing errors
    /// A single output line exceeded the scanner's token ceiling.
    #[error("line too long: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLong {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// Maximum allowed line length.
        max: usize,
    },

    // Configuration errors
    /// A timing parameter set is unusable.
    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    // Stream errors
    /// The underlying stream was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Reading from the underlying stream failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::ReadFailed(err.to_string()),
        }
    }
}
