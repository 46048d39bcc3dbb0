//! Shim error types.

use ccshim_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the shim engine.
#[derive(Debug, Error)]
pub enum ShimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An unexpected message for the current handshake state. Fatal:
    /// the connection is cancelled.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Malformed proposal or invocation input. Surfaced as an Error
    /// reply; the connection continues.
    #[error("{0}")]
    Decode(String),

    /// The peer answered a state operation with an Error message.
    #[error("peer error: {0}")]
    Peer(String),

    /// A reply arrived for a transaction context with nothing in
    /// flight. Indicates a protocol desync for that context only.
    #[error("queue error: {0}")]
    Queue(String),

    /// Invalid caller-supplied argument (composite key segments,
    /// collection names, event names).
    #[error("{0}")]
    InvalidArgument(String),

    /// Application/contract level failure.
    #[error("{0}")]
    Contract(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ShimError {
    /// Returns whether this error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShimError::ProtocolViolation(_)
                | ShimError::Io(_)
                | ShimError::ConnectionClosed
                | ShimError::NotConnected
        )
    }
}
