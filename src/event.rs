//! Events delivered to the consumer of a
//! [`PresenceCoordinator`](crate::PresenceCoordinator).

use crate::protocol::{InboundEvent, RoomUser};

/// Something observable happened on the speaking channel.
///
/// `Closed` is always the last event and is never dropped; every other
/// event may be dropped if the consumer falls behind.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// The transport connected (or reconnected). Not yet authenticated.
    Connected,
    /// The server bound this connection to the caller.
    Authenticated,
    /// A connection attempt failed.
    ConnectError { message: String },
    /// A new presence snapshot was stored.
    RoomUsersUpdated { users: Vec<RoomUser> },
    /// The transport dropped; it may connect again.
    Disconnected,
    /// An event the coordinator does not model.
    Message {
        event: String,
        data: Option<serde_json::Value>,
    },
    /// The coordinator stopped and will emit nothing further.
    Closed { reason: Option<String> },
}

impl PresenceEvent {
    /// The consumer-facing event for an inbound event, if it has one.
    ///
    /// Presence updates without a usable `users` list have none.
    #[cfg_attr(not(feature = "tokio-runtime"), allow(dead_code))]
    pub(crate) fn from_inbound(event: InboundEvent) -> Option<Self> {
        match event {
            InboundEvent::Connect => Some(Self::Connected),
            InboundEvent::Authenticated => Some(Self::Authenticated),
            InboundEvent::ConnectError { message } => Some(Self::ConnectError { message }),
            InboundEvent::RoomUsersUpdate { users } => {
                users.map(|users| Self::RoomUsersUpdated { users })
            }
            InboundEvent::Disconnect => Some(Self::Disconnected),
            InboundEvent::Other { event, data } => Some(Self::Message { event, data }),
        }
    }
}
