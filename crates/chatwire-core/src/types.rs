//! Chat domain types shared by the session runtime and the store
//!
//! Field names follow the remote service's camelCase JSON; aliases cover the
//! spots where the service is inconsistent (`chatRoomId` vs `roomId`,
//! `createdAt` vs `timestamp`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a room (conversation scope).
pub type RoomId = String;

/// Identifier of a user.
pub type UserId = String;

/// Identifier of a message.
pub type MessageId = String;

/// Content type of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Voice,
    Video,
    Location,
}

/// Delivery status of a chat message as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Minimal public profile attached to messages and room rosters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(alias = "chatRoomId")]
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "replyToId")]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub sender: Option<UserSummary>,
}

/// Private (1:1) or group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    #[default]
    Group,
}

/// A room member, sent either as a bare id or as a profile object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RoomMember {
    Id(UserId),
    Profile(UserSummary),
}

impl RoomMember {
    pub fn user_id(&self) -> &str {
        match self {
            RoomMember::Id(id) => id,
            RoomMember::Profile(profile) => &profile.id,
        }
    }
}

/// A room and its roster.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Room {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id() == user_id)
    }
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Offline,
    Away,
    Busy,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence of one user.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(alias = "id")]
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub username: Option<String>,
}

/// The authenticated user returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
}
