//! Wire types for the speaking-room event channel.
//!
//! Every transport message is one JSON [`Frame`]:
//!
//! ```json
//! {"event": "join_room", "data": {"topic": "Environment", "examId": "exam-42"}}
//! ```
//!
//! `data` is omitted for events without a payload (`connect`,
//! `authenticated`, `disconnect`). Payload field names are camelCase to match
//! the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;

/// Logical namespace the speaking rooms live under.
pub const SPEAKING_NAMESPACE: &str = "speaking";

// ── Event names ─────────────────────────────────────────────────────

/// Transport-level connection established.
pub const EVENT_CONNECT: &str = "connect";
/// Server bound the connection to a caller identity.
pub const EVENT_AUTHENTICATED: &str = "authenticated";
/// Authoritative membership snapshot for the caller's room.
pub const EVENT_ROOM_USERS_UPDATE: &str = "room_users_update";
/// Transport failed to establish.
pub const EVENT_CONNECT_ERROR: &str = "connect_error";
/// Transport dropped.
pub const EVENT_DISCONNECT: &str = "disconnect";
/// Request to join a room's presence broadcast.
pub const EVENT_JOIN_ROOM: &str = "join_room";
/// Request to leave a room.
pub const EVENT_LEAVE_ROOM: &str = "leave_room";

// ── Frame ───────────────────────────────────────────────────────────

/// One named event with an optional JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// Build a frame carrying `data`.
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build a frame without a payload.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, None)
    }

    /// Encode the frame as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Serialization`](crate::PresenceError::Serialization)
    /// if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text message into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Serialization`](crate::PresenceError::Serialization)
    /// if `text` is not a JSON object with an `event` string.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// A participant in a room, as last reported by the server.
///
/// Fields beyond `id`, `displayName` and `avatar` are kept in `extra` so the
/// profile is passed through untouched.
///
/// Decoding never fails: the server's list is authoritative, so an entry
/// with an odd shape is kept rather than invalidating the snapshot. The
/// rules are on the `From<Value>` impl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct RoomUser {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomUser {
    /// Create a user with the required identity fields.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: None,
            extra: Map::new(),
        }
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Lenient decoding of one `users` entry.
///
/// - `id` is taken from `id`, falling back to `_id`. Strings are used as-is,
///   numbers as their decimal text and `{"$oid": ..}` as the inner string.
///   Any other value becomes its JSON text. A missing id is empty.
/// - `displayName` and `avatar` are used when they are strings, otherwise
///   they stay in `extra`.
/// - A bare string or number entry is an id with no profile.
/// - Any other entry becomes an id holding its JSON text.
impl From<Value> for RoomUser {
    fn from(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Self::new(id_text(other), String::new()),
        };

        let id = fields
            .remove("id")
            .or_else(|| fields.remove("_id"))
            .map(id_text)
            .unwrap_or_default();
        let display_name = take_string(&mut fields, "displayName").unwrap_or_default();
        let avatar = take_string(&mut fields, "avatar");

        Self {
            id,
            display_name,
            avatar,
            extra: fields,
        }
    }
}

fn id_text(value: Value) -> String {
    match value {
        Value::String(id) => id,
        Value::Number(n) => n.to_string(),
        Value::Object(fields) => {
            if let Some(Value::String(oid)) = fields.get("$oid") {
                return oid.clone();
            }
            Value::Object(fields).to_string()
        }
        other => other.to_string(),
    }
}

/// Remove `key` if it holds a string; other values are left in place.
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !fields.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match fields.remove(key) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    }
}

/// The `{topic, examId}` pair identifying the room to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinIntent {
    pub topic: String,
    pub exam_id: String,
}

impl JoinIntent {
    pub fn new(topic: impl Into<String>, exam_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            exam_id: exam_id.into(),
        }
    }
}

/// Payload of `leave_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoomPayload {
    pub topic: String,
}

/// Payload of `room_users_update`. `users` is optional on the wire; a
/// payload without it, or with anything but an array, carries no snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomUsersPayload {
    #[serde(default)]
    pub users: Option<Vec<RoomUser>>,
}

/// Payload of `connect_error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectErrorPayload {
    #[serde(default)]
    pub message: String,
}

// ── Inbound ─────────────────────────────────────────────────────────

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connect,
    Authenticated,
    /// `users` is `None` when the payload had no usable `users` list.
    RoomUsersUpdate {
        users: Option<Vec<RoomUser>>,
    },
    ConnectError {
        message: String,
    },
    Disconnect,
    /// Any event the coordinator does not model.
    Other {
        event: String,
        data: Option<Value>,
    },
}

impl From<Frame> for InboundEvent {
    fn from(frame: Frame) -> Self {
        match frame.event.as_str() {
            EVENT_CONNECT => Self::Connect,
            EVENT_AUTHENTICATED => Self::Authenticated,
            EVENT_DISCONNECT => Self::Disconnect,
            EVENT_ROOM_USERS_UPDATE => Self::RoomUsersUpdate {
                users: frame.data.and_then(parse_users),
            },
            EVENT_CONNECT_ERROR => Self::ConnectError {
                message: parse_connect_error(frame.data),
            },
            _ => Self::Other {
                event: frame.event,
                data: frame.data,
            },
        }
    }
}

fn parse_users(data: Value) -> Option<Vec<RoomUser>> {
    match serde_json::from_value::<RoomUsersPayload>(data) {
        Ok(payload) => payload.users,
        Err(e) => {
            warn!("malformed room_users_update payload: {e}");
            None
        }
    }
}

fn parse_connect_error(data: Option<Value>) -> String {
    match data {
        Some(Value::String(message)) => message,
        Some(value) => serde_json::from_value::<ConnectErrorPayload>(value)
            .map(|p| p.message)
            .unwrap_or_default(),
        None => String::new(),
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// A command headed for the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    JoinRoom(JoinIntent),
    LeaveRoom { topic: String },
    /// Caller-named event sent through [`emit`](crate::PresenceCoordinator::emit).
    Custom { event: String, data: Option<Value> },
}

impl OutboundCommand {
    /// Wire name of the event this command produces.
    pub fn event_name(&self) -> &str {
        match self {
            Self::JoinRoom(_) => EVENT_JOIN_ROOM,
            Self::LeaveRoom { .. } => EVENT_LEAVE_ROOM,
            Self::Custom { event, .. } => event,
        }
    }

    /// Convert into a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Serialization`](crate::PresenceError::Serialization)
    /// if the payload cannot be represented as JSON.
    pub fn into_frame(self) -> Result<Frame> {
        let frame = match self {
            Self::JoinRoom(intent) => {
                Frame::new(EVENT_JOIN_ROOM, Some(serde_json::to_value(intent)?))
            }
            Self::LeaveRoom { topic } => Frame::new(
                EVENT_LEAVE_ROOM,
                Some(serde_json::to_value(LeaveRoomPayload { topic })?),
            ),
            Self::Custom { event, data } => Frame::new(event, data),
        };
        Ok(frame)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(text: &str) -> InboundEvent {
        InboundEvent::from(Frame::decode(text).unwrap())
    }

    #[test]
    fn bare_frame_omits_data() {
        let text = Frame::bare(EVENT_CONNECT).encode().unwrap();
        assert_eq!(text, r#"{"event":"connect"}"#);
    }

    #[test]
    fn join_room_uses_camel_case_exam_id() {
        let frame = OutboundCommand::JoinRoom(JoinIntent::new("Environment", "exam-42"))
            .into_frame()
            .unwrap();
        assert_eq!(frame.event, "join_room");
        assert_eq!(
            frame.data,
            Some(json!({"topic": "Environment", "examId": "exam-42"}))
        );
    }

    #[test]
    fn leave_room_carries_topic_only() {
        let frame = OutboundCommand::LeaveRoom {
            topic: "Travel".into(),
        }
        .into_frame()
        .unwrap();
        assert_eq!(frame.data, Some(json!({"topic": "Travel"})));
    }

    #[test]
    fn room_users_update_keeps_server_order() {
        let event = inbound(
            r#"{"event":"room_users_update","data":{"users":[
                {"id":"u2","displayName":"Bea"},
                {"id":"u1","displayName":"Al","avatar":"a.png"}
            ]}}"#,
        );
        let users = match event {
            InboundEvent::RoomUsersUpdate { users: Some(users) } => users,
            other => panic!("expected users, got {other:?}"),
        };
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["u2", "u1"]);
        assert_eq!(users[1].avatar.as_deref(), Some("a.png"));
    }

    #[test]
    fn room_users_update_without_users_has_none() {
        assert_eq!(
            inbound(r#"{"event":"room_users_update","data":{"room":"x"}}"#),
            InboundEvent::RoomUsersUpdate { users: None }
        );
        assert_eq!(
            inbound(r#"{"event":"room_users_update"}"#),
            InboundEvent::RoomUsersUpdate { users: None }
        );
        assert_eq!(
            inbound(r#"{"event":"room_users_update","data":{"users":"nope"}}"#),
            InboundEvent::RoomUsersUpdate { users: None }
        );
    }

    #[test]
    fn empty_users_list_is_a_real_snapshot() {
        assert_eq!(
            inbound(r#"{"event":"room_users_update","data":{"users":[]}}"#),
            InboundEvent::RoomUsersUpdate {
                users: Some(vec![])
            }
        );
    }

    #[test]
    fn extra_profile_fields_are_preserved() {
        let user: RoomUser =
            serde_json::from_value(json!({"id": "u1", "displayName": "Al", "level": "B2"}))
                .unwrap();
        assert_eq!(user.extra.get("level"), Some(&json!("B2")));
        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["level"], "B2");
    }

    #[test]
    fn user_entry_decoding_is_lenient() {
        let decode = |value: Value| serde_json::from_value::<RoomUser>(value).unwrap();

        assert_eq!(decode(json!({"id": 7, "displayName": "Al"})), RoomUser::new("7", "Al"));
        assert_eq!(decode(json!({"_id": "x1"})), RoomUser::new("x1", ""));
        assert_eq!(decode(json!({"id": "a", "_id": "b"})).extra.get("_id"), Some(&json!("b")));
        assert_eq!(decode(json!("u9")), RoomUser::new("u9", ""));
        assert_eq!(decode(json!({"displayName": "Anon"})), RoomUser::new("", "Anon"));

        let odd = decode(json!({"id": "u1", "displayName": 5}));
        assert_eq!(odd.display_name, "");
        assert_eq!(odd.extra.get("displayName"), Some(&json!(5)));
    }

    #[test]
    fn connect_error_accepts_object_or_string() {
        assert_eq!(
            inbound(r#"{"event":"connect_error","data":{"message":"refused"}}"#),
            InboundEvent::ConnectError {
                message: "refused".into()
            }
        );
        assert_eq!(
            inbound(r#"{"event":"connect_error","data":"timeout"}"#),
            InboundEvent::ConnectError {
                message: "timeout".into()
            }
        );
    }

    #[test]
    fn unknown_events_pass_through() {
        assert_eq!(
            inbound(r#"{"event":"speaking_turn","data":{"user":"u1"}}"#),
            InboundEvent::Other {
                event: "speaking_turn".into(),
                data: Some(json!({"user": "u1"})),
            }
        );
    }

    #[test]
    fn decode_rejects_frames_without_event() {
        assert!(Frame::decode(r#"{"data":{}}"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }
}
