//! Error types for wjmotion.
//!
//! All fallible operations across the driver return [`Result<T>`], which
//! uses [`Error`] as the error type. Validation, protocol, timeout, and
//! transport failures are all captured here, and each maps onto one of the
//! integer status codes of the vendor API (see [`crate::status`]).

use crate::status;

/// The error type for all wjmotion operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An axis number, I/O line, or sequence length was out of range.
    ///
    /// Always detected before any byte is written to the transport.
    #[error("validation error: {0}")]
    Validation(String),

    /// Timed out waiting for a response from the board after all retries.
    #[error("timeout waiting for response")]
    Timeout,

    /// A frame could not be decoded, or the board rejected the command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation was attempted before `open`, after `close`, or after
    /// the connection faulted.
    #[error("not connected")]
    NotConnected,

    /// A transport-level error (serial port, USB virtual COM port).
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection to the board was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A queued command was cancelled before it reached the transport.
    #[error("command cancelled")]
    Cancelled,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for failures of the underlying channel.
    ///
    /// Fatal errors are never retried; they move the connection into the
    /// faulted state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ConnectionLost | Error::Io(_)
        )
    }

    /// The vendor API status code for this error (always negative).
    pub fn status_code(&self) -> i32 {
        match self {
            Error::Validation(_) => status::VALIDATION,
            Error::Timeout => status::TIMEOUT,
            Error::Protocol(_) => status::PROTOCOL,
            Error::NotConnected => status::NOT_CONNECTED,
            Error::Transport(_) | Error::ConnectionLost | Error::Io(_) => status::TRANSPORT,
            Error::Cancelled => status::CANCELLED,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
