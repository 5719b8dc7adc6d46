//! Transport abstraction for the speaking-room event channel.
//!
//! The [`Transport`] trait is a bidirectional text channel carrying one JSON
//! [`Frame`](crate::protocol::Frame) per message. Lifecycle signals are
//! frames too: a transport reports that bytes can flow by yielding a
//! `connect` frame, a dropped link with `disconnect`, and a failed attempt
//! with `connect_error`. A transport that reconnects on its own simply yields
//! another `connect` frame later on.
//!
//! # Connection Setup
//!
//! Establishing the link (URL, namespace, handshake, retry/backoff) is the
//! transport's business and not part of this trait. Build a transport
//! externally, then hand it to `PresenceCoordinator::start`, which takes
//! exclusive ownership of it.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use speaking_presence::error::PresenceError;
//! use speaking_presence::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
//!         // Write one encoded frame
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
//!         // Yield the next encoded frame, or None once the link is gone for good
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), PresenceError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::PresenceError;

/// A bidirectional frame transport for the speaking-room channel.
///
/// # Object Safety
///
/// The trait is object-safe, so `Box<dyn Transport>` works when dynamic
/// dispatch is needed.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the coordinator polls it
/// inside `tokio::select!`, and a cancelled call must not lose a frame.
/// Channel-backed implementations get this for free.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one encoded frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::TransportSend`] or
    /// [`PresenceError::TransportClosed`] when the frame cannot be written.
    async fn send(&mut self, frame: String) -> Result<(), PresenceError>;

    /// Receive the next encoded frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))` for a complete frame
    /// - `Some(Err(e))` when the transport failed
    /// - `None` when the transport is finished and will not reconnect
    async fn recv(&mut self) -> Option<Result<String, PresenceError>>;

    /// Close the transport. Must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), PresenceError>;
}
