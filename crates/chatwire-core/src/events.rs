//! Realtime event definitions
//!
//! Inbound events arrive from the remote service as `(name, json)` pairs and
//! are decoded into [`InboundEvent`] by [`parse_inbound`]. Outbound events are
//! built from [`OutboundEvent`], which knows its wire name and payload shape.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::types::{
    ChatMessage, MessageId, MessageKind, Presence, PresenceStatus, Room, RoomId, UserId,
};

/// Wire names of events exchanged with the remote service.
pub mod names {
    // Server → client
    pub const AUTHENTICATED: &str = "authenticated";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const MESSAGE_EDITED: &str = "message_edited";
    pub const MESSAGE_DELETED: &str = "message_deleted";
    pub const MESSAGES_HISTORY: &str = "messages_history";
    pub const NEW_ROOM: &str = "new_room";
    pub const ROOM_CREATED: &str = "room_created";
    pub const ROOMS_LIST: &str = "rooms_list";
    pub const USER_STATUS_UPDATE: &str = "user_status_update";
    pub const ONLINE_USERS: &str = "online_users";
    pub const ERROR: &str = "error";

    // Both directions
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_STOP: &str = "typing_stop";

    // Client → server
    pub const SEND_MESSAGE: &str = "send_message";
    pub const EDIT_MESSAGE: &str = "edit_message";
    pub const DELETE_MESSAGE: &str = "delete_message";
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const CREATE_PRIVATE_CHAT: &str = "create_private_chat";
    pub const CREATE_GROUP_CHAT: &str = "create_group_chat";
    pub const GET_ROOMS: &str = "get_rooms";
    pub const GET_MESSAGES: &str = "get_messages";
    pub const GET_ONLINE_USERS: &str = "get_online_users";
    pub const UPDATE_STATUS: &str = "update_status";
}

// ─────────────────────────────────────────────────────────
// Inbound payloads
// ─────────────────────────────────────────────────────────

/// An edit applied to an existing message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdit {
    pub message_id: MessageId,
    pub content: String,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

/// Someone started or stopped typing in a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

/// Result of the handshake authentication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// An error reported by the remote service over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// How a room announcement reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOrigin {
    /// We asked for the room to be created (`room_created`).
    CreatedHere,
    /// Someone else added us to the room (`new_room`).
    Invited,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedPayload {
    message_id: MessageId,
    room_id: RoomId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    room_id: RoomId,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct RoomsPayload {
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct UsersPayload {
    users: Vec<Presence>,
}

// ─────────────────────────────────────────────────────────
// InboundEvent
// ─────────────────────────────────────────────────────────

/// A decoded event from the remote service.
///
/// Each variant is consumed exactly once by the synchronization sink.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessageCreated(ChatMessage),
    MessageEdited(MessageEdit),
    MessageDeleted {
        message_id: MessageId,
        room_id: RoomId,
    },
    MessageHistory {
        room_id: RoomId,
        messages: Vec<ChatMessage>,
    },
    RoomCreated {
        room: Room,
        origin: RoomOrigin,
    },
    RoomListSnapshot(Vec<Room>),
    PresenceChanged(Presence),
    OnlineUsers(Vec<Presence>),
    TypingStarted(TypingNotice),
    TypingStopped(TypingNotice),
    AuthResult(AuthOutcome),
    TransportError(ServerError),
}

impl InboundEvent {
    /// Short tag used in diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            InboundEvent::MessageCreated(_) => "MessageCreated",
            InboundEvent::MessageEdited(_) => "MessageEdited",
            InboundEvent::MessageDeleted { .. } => "MessageDeleted",
            InboundEvent::MessageHistory { .. } => "MessageHistory",
            InboundEvent::RoomCreated { .. } => "RoomCreated",
            InboundEvent::RoomListSnapshot(_) => "RoomListSnapshot",
            InboundEvent::PresenceChanged(_) => "PresenceChanged",
            InboundEvent::OnlineUsers(_) => "OnlineUsers",
            InboundEvent::TypingStarted(_) => "TypingStarted",
            InboundEvent::TypingStopped(_) => "TypingStopped",
            InboundEvent::AuthResult(_) => "AuthResult",
            InboundEvent::TransportError(_) => "TransportError",
        }
    }

    /// The room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            InboundEvent::MessageCreated(msg) => Some(&msg.room_id),
            InboundEvent::MessageEdited(edit) => edit.room_id.as_deref(),
            InboundEvent::MessageDeleted { room_id, .. }
            | InboundEvent::MessageHistory { room_id, .. } => Some(room_id),
            InboundEvent::RoomCreated { room, .. } => Some(&room.id),
            InboundEvent::TypingStarted(notice) | InboundEvent::TypingStopped(notice) => {
                Some(&notice.room_id)
            }
            InboundEvent::RoomListSnapshot(_)
            | InboundEvent::PresenceChanged(_)
            | InboundEvent::OnlineUsers(_)
            | InboundEvent::AuthResult(_)
            | InboundEvent::TransportError(_) => None,
        }
    }
}

/// Decode a named inbound event.
///
/// # Errors
///
/// Returns [`Error::MalformedEvent`] for unknown event names and for payloads
/// that do not match the expected shape.
pub fn parse_inbound(event: &str, data: Value) -> Result<InboundEvent> {
    use names::*;

    let parsed = match event {
        AUTHENTICATED => InboundEvent::AuthResult(decode(event, data)?),
        NEW_MESSAGE => InboundEvent::MessageCreated(decode(event, data)?),
        MESSAGE_EDITED => InboundEvent::MessageEdited(decode(event, data)?),
        MESSAGE_DELETED => {
            let payload: DeletedPayload = decode(event, data)?;
            InboundEvent::MessageDeleted {
                message_id: payload.message_id,
                room_id: payload.room_id,
            }
        }
        MESSAGES_HISTORY => {
            let payload: HistoryPayload = decode(event, data)?;
            InboundEvent::MessageHistory {
                room_id: payload.room_id,
                messages: payload.messages,
            }
        }
        NEW_ROOM => InboundEvent::RoomCreated {
            room: decode(event, data)?,
            origin: RoomOrigin::Invited,
        },
        ROOM_CREATED => InboundEvent::RoomCreated {
            room: decode(event, data)?,
            origin: RoomOrigin::CreatedHere,
        },
        ROOMS_LIST => InboundEvent::RoomListSnapshot(decode::<RoomsPayload>(event, data)?.rooms),
        USER_STATUS_UPDATE => InboundEvent::PresenceChanged(decode(event, data)?),
        ONLINE_USERS => InboundEvent::OnlineUsers(decode::<UsersPayload>(event, data)?.users),
        TYPING_START => InboundEvent::TypingStarted(decode(event, data)?),
        TYPING_STOP => InboundEvent::TypingStopped(decode(event, data)?),
        ERROR => InboundEvent::TransportError(decode(event, data)?),
        _ => return Err(Error::malformed(event, "unknown event")),
    };

    Ok(parsed)
}

fn decode<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::malformed(event, e.to_string()))
}

// ─────────────────────────────────────────────────────────
// OutboundEvent
// ─────────────────────────────────────────────────────────

/// An event this client sends to the remote service.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    SendMessage {
        room_id: RoomId,
        content: String,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    },
    EditMessage {
        message_id: MessageId,
        content: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    CreatePrivateChat {
        target_user_id: UserId,
    },
    CreateGroupChat {
        name: String,
        member_ids: Vec<UserId>,
    },
    GetRooms,
    GetMessages(RoomId),
    GetOnlineUsers,
    UpdateStatus(PresenceStatus),
    TypingStart(RoomId),
    TypingStop(RoomId),
}

impl OutboundEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SendMessage { .. } => names::SEND_MESSAGE,
            OutboundEvent::EditMessage { .. } => names::EDIT_MESSAGE,
            OutboundEvent::DeleteMessage { .. } => names::DELETE_MESSAGE,
            OutboundEvent::JoinRoom(_) => names::JOIN_ROOM,
            OutboundEvent::LeaveRoom(_) => names::LEAVE_ROOM,
            OutboundEvent::CreatePrivateChat { .. } => names::CREATE_PRIVATE_CHAT,
            OutboundEvent::CreateGroupChat { .. } => names::CREATE_GROUP_CHAT,
            OutboundEvent::GetRooms => names::GET_ROOMS,
            OutboundEvent::GetMessages(_) => names::GET_MESSAGES,
            OutboundEvent::GetOnlineUsers => names::GET_ONLINE_USERS,
            OutboundEvent::UpdateStatus(_) => names::UPDATE_STATUS,
            OutboundEvent::TypingStart(_) => names::TYPING_START,
            OutboundEvent::TypingStop(_) => names::TYPING_STOP,
        }
    }

    /// JSON body of this event.
    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::SendMessage {
                room_id,
                content,
                kind,
                reply_to,
            } => json!({
                "roomId": room_id,
                "content": content,
                "type": kind,
                "replyToId": reply_to,
            }),
            OutboundEvent::EditMessage {
                message_id,
                content,
            } => json!({ "messageId": message_id, "content": content }),
            OutboundEvent::DeleteMessage { message_id } => json!({ "messageId": message_id }),
            OutboundEvent::JoinRoom(room_id)
            | OutboundEvent::LeaveRoom(room_id)
            | OutboundEvent::GetMessages(room_id) => json!(room_id),
            OutboundEvent::CreatePrivateChat { target_user_id } => json!(target_user_id),
            OutboundEvent::CreateGroupChat { name, member_ids } => {
                json!({ "name": name, "memberIds": member_ids })
            }
            OutboundEvent::GetRooms | OutboundEvent::GetOnlineUsers => Value::Null,
            OutboundEvent::UpdateStatus(status) => json!({ "status": status }),
            OutboundEvent::TypingStart(room_id) | OutboundEvent::TypingStop(room_id) => {
                json!({ "roomId": room_id })
            }
        }
    }

}
