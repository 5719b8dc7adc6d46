//! The coordinator's transition function.
//!
//! [`Session`] combines the [`AuthGate`] and the [`PresenceStore`] and is
//! driven by two kinds of input: caller [`Command`]s and decoded
//! [`InboundEvent`]s. Each call runs to completion and returns the command, if
//! any, that must be written to the transport. No I/O happens here, so every
//! ordering of events can be exercised synchronously in tests.

use tracing::{debug, warn};

use crate::gate::AuthGate;
use crate::protocol::{InboundEvent, JoinIntent, OutboundCommand};
use crate::store::PresenceStore;

/// A caller request queued for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join(JoinIntent),
    Leave { topic: String },
    Emit {
        event: String,
        data: Option<serde_json::Value>,
    },
}

/// Session behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// `leave_room` for a topic also discards a still-pending join for it.
    pub cancel_pending_join_on_leave: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cancel_pending_join_on_leave: true,
        }
    }
}

/// Presence state across connection lifetimes.
///
/// A join requested while offline waits for the next session. A join queued
/// during a session that then ends is stale and is discarded.
#[derive(Debug)]
pub struct Session {
    gate: AuthGate,
    store: PresenceStore,
    options: SessionOptions,
    connected: bool,
}

impl Session {
    pub fn new(store: PresenceStore, options: SessionOptions) -> Self {
        Self {
            gate: AuthGate::new(),
            store,
            options,
            connected: false,
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn store(&self) -> &PresenceStore {
        &self.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.gate.is_authenticated()
    }

    /// Whether a `connect` was seen without a matching `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Apply a caller command.
    pub fn handle_command(&mut self, command: Command) -> Option<OutboundCommand> {
        match command {
            Command::Join(intent) => {
                let ready = self.gate.request_join(intent);
                if ready.is_none() {
                    debug!("session: join queued until authenticated");
                }
                ready.map(OutboundCommand::JoinRoom)
            }
            Command::Leave { topic } => {
                if self.options.cancel_pending_join_on_leave {
                    if let Some(cancelled) = self.gate.cancel_pending(&topic) {
                        debug!(
                            topic = %cancelled.topic,
                            exam_id = %cancelled.exam_id,
                            "session: pending join cancelled by leave"
                        );
                    }
                }
                Some(OutboundCommand::LeaveRoom { topic })
            }
            Command::Emit { event, data } => Some(OutboundCommand::Custom { event, data }),
        }
    }

    /// Apply an inbound event.
    pub fn handle_inbound(&mut self, event: &InboundEvent) -> Option<OutboundCommand> {
        match event {
            InboundEvent::Connect => {
                if self.connected {
                    self.reset_connection("reconnect");
                } else {
                    self.gate.close();
                    self.store.clear();
                }
                self.connected = true;
                None
            }
            InboundEvent::Disconnect => {
                self.reset_connection("disconnect");
                self.connected = false;
                None
            }
            InboundEvent::Authenticated => {
                let flushed = self.gate.on_authenticated();
                debug!(flushing = flushed.is_some(), "session: authenticated");
                flushed.map(OutboundCommand::JoinRoom)
            }
            InboundEvent::RoomUsersUpdate { users: Some(users) } => {
                self.store.replace(users.clone());
                None
            }
            InboundEvent::RoomUsersUpdate { users: None } => {
                warn!("room_users_update without users ignored");
                None
            }
            InboundEvent::ConnectError { message } => {
                warn!("connect_error: {message}");
                None
            }
            InboundEvent::Other { .. } => None,
        }
    }

    /// Discard all connection state. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.reset_connection("teardown");
        self.connected = false;
    }

    fn reset_connection(&mut self, cause: &str) {
        if let Some(dropped) = self.gate.reset() {
            debug!(
                topic = %dropped.topic,
                exam_id = %dropped.exam_id,
                "session: stale pending join discarded on {cause}"
            );
        }
        self.store.clear();
    }
}
