//! Transport implementations for the speaking-room channel.
//!
//! Enable the corresponding Cargo feature to pull in a transport:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), speaking_presence::PresenceError> {
//! use speaking_presence::protocol::SPEAKING_NAMESPACE;
//! use speaking_presence::{Transport, WebSocketTransport};
//!
//! let mut ws =
//!     WebSocketTransport::connect_namespace("ws://localhost:4000", SPEAKING_NAMESPACE).await?;
//!
//! // The first frame is always the synthetic `connect`.
//! if let Some(Ok(frame)) = ws.recv().await {
//!     println!("transport said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
