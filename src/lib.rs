//! # Speaking Presence
//!
//! Transport-agnostic presence coordinator for live speaking-practice rooms.
//!
//! Learners join a shared topic room over a bidirectional event channel; the
//! server answers with authoritative `room_users_update` snapshots. This crate
//! keeps the client side of that exchange consistent:
//!
//! - **Authentication-gated joins**: `join_room` is held back until the
//!   server sends `authenticated` on the current connection, keeping only the
//!   latest request, and replayed exactly once
//! - **Wholesale presence snapshots**: each update replaces the previous
//!   list; read it reactively through a `tokio::sync::watch` receiver
//! - **Reconnect-aware**: a new connection must authenticate again, and a
//!   join queued on a session that ended is dropped
//! - **Transport-agnostic**: implement [`Transport`] for any backend; a
//!   WebSocket transport ships behind the default `transport-websocket` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use speaking_presence::{PresenceConfig, PresenceCoordinator, WebSocketTransport};
//! use speaking_presence::protocol::SPEAKING_NAMESPACE;
//!
//! let transport =
//!     WebSocketTransport::connect_namespace("ws://localhost:4000", SPEAKING_NAMESPACE).await?;
//! let (coordinator, mut events) = PresenceCoordinator::start(transport, PresenceConfig::new());
//! coordinator.join_room("Environment", "exam-42");
//! ```

#[cfg(feature = "tokio-runtime")]
mod channel;
#[cfg(feature = "tokio-runtime")]
pub mod coordinator;
pub mod error;
pub mod event;
pub mod gate;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
#[cfg(feature = "tokio-runtime")]
pub use coordinator::{PresenceConfig, PresenceCoordinator};
pub use error::PresenceError;
pub use event::PresenceEvent;
pub use gate::{AuthGate, AuthState};
pub use protocol::{Frame, InboundEvent, JoinIntent, OutboundCommand, RoomUser};
pub use session::{Command, Session, SessionOptions};
pub use store::PresenceStore;
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
