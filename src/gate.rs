//! Authentication gate and single-slot pending join.
//!
//! A transport `connect` only means bytes can flow. The server binds the
//! connection to a caller identity later and says so with `authenticated`.
//! Until then no `join_room` may leave the client: the latest join request is
//! parked in a one-entry slot and flushed exactly once when the gate opens.
//!
//! ```text
//!              connect / disconnect / reset
//!        ┌───────────────────────────────────────┐
//!        ▼                                      │
//!  Unauthenticated { pending } ──authenticated──► Authenticated
//! ```

use tracing::debug;

use crate::protocol::JoinIntent;

/// Authentication state of the current connection instance.
///
/// The pending slot only exists while unauthenticated, so a queued join
/// alongside an open gate cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated { pending: Option<JoinIntent> },
    Authenticated,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::Unauthenticated { pending: None }
    }
}

/// Tracks [`AuthState`] and decides when a join may be sent.
#[derive(Debug, Default)]
pub struct AuthGate {
    state: AuthState,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    /// The join waiting for authentication, if any.
    pub fn pending(&self) -> Option<&JoinIntent> {
        match &self.state {
            AuthState::Unauthenticated { pending } => pending.as_ref(),
            AuthState::Authenticated => None,
        }
    }

    /// Request a join.
    ///
    /// Returns the intent when it may be sent right away. Otherwise it
    /// replaces whatever was pending and `None` is returned.
    pub fn request_join(&mut self, intent: JoinIntent) -> Option<JoinIntent> {
        match &mut self.state {
            AuthState::Authenticated => Some(intent),
            AuthState::Unauthenticated { pending } => {
                if let Some(previous) = pending.replace(intent) {
                    debug!(
                        topic = %previous.topic,
                        exam_id = %previous.exam_id,
                        "gate: pending join superseded"
                    );
                }
                None
            }
        }
    }

    /// The server confirmed the caller's identity.
    ///
    /// Opens the gate and returns the pending join, which must be sent now.
    /// A duplicate confirmation returns `None`.
    pub fn on_authenticated(&mut self) -> Option<JoinIntent> {
        match std::mem::replace(&mut self.state, AuthState::Authenticated) {
            AuthState::Unauthenticated { pending } => pending,
            AuthState::Authenticated => None,
        }
    }

    /// Drop a pending join for `topic`. Returns the discarded intent.
    pub fn cancel_pending(&mut self, topic: &str) -> Option<JoinIntent> {
        match &mut self.state {
            AuthState::Unauthenticated { pending }
                if pending.as_ref().is_some_and(|p| p.topic == topic) =>
            {
                pending.take()
            }
            _ => None,
        }
    }

    /// Close the gate but keep a pending join.
    ///
    /// Used when a connection comes up from offline: a join requested while
    /// no session existed targets the new one.
    pub fn close(&mut self) {
        if self.is_authenticated() {
            self.state = AuthState::default();
        }
    }

    /// Close the gate and discard any pending join.
    ///
    /// Used when a session ends (`disconnect`, a `connect` replacing a live
    /// connection, teardown). Returns the discarded intent.
    pub fn reset(&mut self) -> Option<JoinIntent> {
        match std::mem::take(&mut self.state) {
            AuthState::Unauthenticated { pending } => pending,
            AuthState::Authenticated => None,
        }
    }
}
