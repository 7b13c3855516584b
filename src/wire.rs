//! Wire contract for the room WebSocket.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text message is one JSON envelope:
//! `{"event": "<name>", "data": {...}}`. Inbound envelopes are decoded into a
//! typed `ClientEvent` here, so nothing past this module ever sees raw JSON.
//! Outbound traffic is a `ServerEvent`, serialized with the same envelope.
//!
//! DESIGN
//! ======
//! - Decoding is two-step: the envelope first, then the payload for the named
//!   event. That way a malformed payload is reported against its event name.
//! - Field names are camelCase, ids are UUID strings.
//! - Validation (missing fields, empty or over-long content) happens here and
//!   never reaches a room actor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_JOIN_ROOM: &str = "join-room";
pub const EVENT_LEAVE_ROOM: &str = "leave-room";
pub const EVENT_SEND_MESSAGE: &str = "send-message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_GET_ROOM_INFO: &str = "get-room-info";

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

impl WireError {
    /// The inbound event the error belongs to, when the envelope was readable.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) => None,
            Self::UnknownEvent(name) => Some(name),
            Self::InvalidPayload { event, .. } => Some(event),
        }
    }
}

impl ErrorCode for WireError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "E_INVALID_JSON",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::InvalidPayload { .. } => "E_INVALID_PAYLOAD",
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    pub room_id: Uuid,
    /// Carried by clients for symmetry; the server trusts its own session.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRoomInfo {
    pub room_id: Uuid,
    /// Re-read the message count from the store instead of the actor's cache.
    #[serde(default)]
    pub refresh: bool,
}

/// A validated inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    LeaveRoom(LeaveRoom),
    SendMessage(SendMessage),
    Typing(Typing),
    GetRoomInfo(GetRoomInfo),
}

impl ClientEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => EVENT_JOIN_ROOM,
            Self::LeaveRoom(_) => EVENT_LEAVE_ROOM,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::Typing(_) => EVENT_TYPING,
            Self::GetRoomInfo(_) => EVENT_GET_ROOM_INFO,
        }
    }
}

/// Decode and validate one inbound text message.
///
/// # Errors
///
/// Returns a [`WireError`] for unparseable JSON, an unknown event name, or a
/// payload with missing/ill-typed fields or unacceptable message content.
pub fn decode(text: &str, max_message_len: usize) -> Result<ClientEvent, WireError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| WireError::InvalidJson(e.to_string()))?;

    match envelope.event.as_str() {
        EVENT_JOIN_ROOM => payload(EVENT_JOIN_ROOM, envelope.data).map(ClientEvent::JoinRoom),
        EVENT_LEAVE_ROOM => payload(EVENT_LEAVE_ROOM, envelope.data).map(ClientEvent::LeaveRoom),
        EVENT_SEND_MESSAGE => {
            let msg: SendMessage = payload(EVENT_SEND_MESSAGE, envelope.data)?;
            validate_content(&msg.content, max_message_len)?;
            Ok(ClientEvent::SendMessage(msg))
        }
        EVENT_TYPING => payload(EVENT_TYPING, envelope.data).map(ClientEvent::Typing),
        EVENT_GET_ROOM_INFO => payload(EVENT_GET_ROOM_INFO, envelope.data).map(ClientEvent::GetRoomInfo),
        _ => Err(WireError::UnknownEvent(envelope.event)),
    }
}

fn payload<T: serde::de::DeserializeOwned>(event: &'static str, data: serde_json::Value) -> Result<T, WireError> {
    serde_json::from_value(data).map_err(|e| WireError::InvalidPayload { event, reason: e.to_string() })
}

fn validate_content(content: &str, max_len: usize) -> Result<(), WireError> {
    if content.trim().is_empty() {
        return Err(WireError::InvalidPayload { event: EVENT_SEND_MESSAGE, reason: "content must not be empty".into() });
    }
    let len = content.chars().count();
    if len > max_len {
        return Err(WireError::InvalidPayload {
            event: EVENT_SEND_MESSAGE,
            reason: format!("content exceeds {max_len} characters (got {len})"),
        });
    }
    Ok(())
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: Uuid,
}

/// Confirmation sent to the requester of a join or leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAck {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
}

/// Join/leave notice sent to the other members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberNotice {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnippet {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub user: UserSnippet,
    /// Milliseconds since Unix epoch, as stored.
    pub sent_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: Uuid,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub creator: Option<UserSnippet>,
    pub member_count: usize,
    pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    pub code: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// Every event the server emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(Connected),
    JoinedRoom(RoomAck),
    UserJoined(MemberNotice),
    LeftRoom(RoomAck),
    UserLeft(MemberNotice),
    NewMessage(NewMessage),
    UserTyping(UserTyping),
    RoomInfo(RoomSummary),
    Error(ErrorEvent),
}

impl ServerEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::JoinedRoom(_) => "joined-room",
            Self::UserJoined(_) => "user-joined",
            Self::LeftRoom(_) => "left-room",
            Self::UserLeft(_) => "user-left",
            Self::NewMessage(_) => "new-message",
            Self::UserTyping(_) => "user-typing",
            Self::RoomInfo(_) => "room-info",
            Self::Error(_) => "error",
        }
    }

    /// Structured error from a typed error, tagged with the failed event name.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized), event: Option<&str>) -> Self {
        Self::Error(ErrorEvent {
            message: err.to_string(),
            code: err.error_code().to_string(),
            retryable: err.retryable(),
            event: event.map(str::to_string),
        })
    }

    /// Serialize into the JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns a serialization error; unreachable for well-formed events.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;
