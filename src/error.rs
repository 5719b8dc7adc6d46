//! Error types for the speaking-room presence coordinator.
//!
//! The public [`PresenceCoordinator`](crate::coordinator::PresenceCoordinator)
//! API never returns these; they appear at the [`Transport`](crate::Transport)
//! seam and in the frame codec, and are logged by the background loop.

use thiserror::Error;

/// Errors raised by transports and the wire codec.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to encode or decode a wire frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for presence operations.
pub type Result<T> = std::result::Result<T, PresenceError>;
