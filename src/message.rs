//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Every inbound message
//! carries a bearer token; outbound messages are a separate type with no
//! token or password fields, so nothing sensitive can be broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::model::{Invite, InviteKind, Room};
use crate::types::{InviteId, MessageId, RoomId, UserId};

/// Client → Server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Re-authenticate and rebuild broadcast group membership
    Login { token: String },
    /// Create a room
    AddRoom {
        token: String,
        name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        is_private: bool,
    },
    /// Join a public room
    JoinRoom {
        token: String,
        room_id: RoomId,
        #[serde(default)]
        password: String,
    },
    LeaveRoom { token: String, room_id: RoomId },
    /// Open a direct-message room with another user
    DirectMessage { token: String, target_id: UserId },
    DeleteRoom { token: String, room_id: RoomId },
    ChatMessage {
        token: String,
        room_id: RoomId,
        content: String,
    },
    Mute {
        token: String,
        room_id: RoomId,
        target_id: UserId,
        minutes: i64,
    },
    ToggleOperator {
        token: String,
        room_id: RoomId,
        target_id: UserId,
    },
    Ban {
        token: String,
        room_id: RoomId,
        target_id: UserId,
    },
    Kick {
        token: String,
        room_id: RoomId,
        target_id: UserId,
    },
    TogglePrivate { token: String, room_id: RoomId },
    SetPassword {
        token: String,
        room_id: RoomId,
        #[serde(default)]
        password: String,
    },
    Invite {
        token: String,
        room_id: RoomId,
        target_id: UserId,
    },
    AcceptInvite {
        token: String,
        room_id: RoomId,
        #[serde(default)]
        password: String,
    },
    RefuseInvite { token: String, invite_id: InviteId },
    /// Start following a room this user is a participant of
    JoinSocketRoom { token: String, room_id: RoomId },
    /// Stop following a room this user was removed or banned from
    LeaveSocketRoom { token: String, room_id: RoomId },
}

impl ClientMessage {
    pub fn token(&self) -> &str {
        match self {
            ClientMessage::Login { token }
            | ClientMessage::AddRoom { token, .. }
            | ClientMessage::JoinRoom { token, .. }
            | ClientMessage::LeaveRoom { token, .. }
            | ClientMessage::DirectMessage { token, .. }
            | ClientMessage::DeleteRoom { token, .. }
            | ClientMessage::ChatMessage { token, .. }
            | ClientMessage::Mute { token, .. }
            | ClientMessage::ToggleOperator { token, .. }
            | ClientMessage::Ban { token, .. }
            | ClientMessage::Kick { token, .. }
            | ClientMessage::TogglePrivate { token, .. }
            | ClientMessage::SetPassword { token, .. }
            | ClientMessage::Invite { token, .. }
            | ClientMessage::AcceptInvite { token, .. }
            | ClientMessage::RefuseInvite { token, .. }
            | ClientMessage::JoinSocketRoom { token, .. }
            | ClientMessage::LeaveSocketRoom { token, .. } => token,
        }
    }

    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "login",
            ClientMessage::AddRoom { .. } => "add-room",
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::DirectMessage { .. } => "direct-message",
            ClientMessage::DeleteRoom { .. } => "delete-room",
            ClientMessage::ChatMessage { .. } => "chat-message",
            ClientMessage::Mute { .. } => "mute",
            ClientMessage::ToggleOperator { .. } => "toggle-operator",
            ClientMessage::Ban { .. } => "ban",
            ClientMessage::Kick { .. } => "kick",
            ClientMessage::TogglePrivate { .. } => "toggle-private",
            ClientMessage::SetPassword { .. } => "set-password",
            ClientMessage::Invite { .. } => "invite",
            ClientMessage::AcceptInvite { .. } => "accept-invite",
            ClientMessage::RefuseInvite { .. } => "refuse-invite",
            ClientMessage::JoinSocketRoom { .. } => "join-socket-room",
            ClientMessage::LeaveSocketRoom { .. } => "leave-socket-room",
        }
    }
}

/// Public view of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub is_direct_message: bool,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Room> for RoomInfo {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            is_private: room.is_private,
            is_direct_message: room.is_direct_message,
            has_password: room.has_password(),
            created_at: room.created_at,
        }
    }
}

/// Public view of an invite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteInfo {
    pub id: InviteId,
    pub kind: InviteKind,
    pub sender_id: UserId,
    pub sender_username: String,
    pub invited_id: UserId,
    pub invited_username: String,
    pub room: RoomInfo,
    pub expires_at: DateTime<Utc>,
}

impl InviteInfo {
    pub fn new(invite: &Invite, sender_username: String, invited_username: String, room: &Room) -> Self {
        Self {
            id: invite.id,
            kind: invite.kind,
            sender_id: invite.sender_id,
            sender_username,
            invited_id: invite.invited_id,
            invited_username,
            room: RoomInfo::from(room),
            expires_at: invite.expires_at,
        }
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Connection accepted and authenticated
    Connected { client_id: String, user_id: UserId },
    Login { user_id: UserId, username: String },
    AddRoom {
        room: RoomInfo,
        owner_id: UserId,
        owner_username: String,
    },
    JoinRoom {
        room: RoomInfo,
        user_id: UserId,
        username: String,
    },
    LeaveRoom {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        room_deleted: bool,
    },
    DirectMessage {
        room: RoomInfo,
        user_id: UserId,
        username: String,
        target_id: UserId,
        target_username: String,
    },
    DeleteRoom { room_id: RoomId, user_id: UserId },
    ChatMessage {
        id: MessageId,
        room_id: RoomId,
        user_id: UserId,
        username: String,
        content: String,
        sent_at: DateTime<Utc>,
    },
    Mute {
        room_id: RoomId,
        user_id: UserId,
        target_id: UserId,
        username: String,
        muted_until: DateTime<Utc>,
    },
    ToggleOperator {
        room_id: RoomId,
        user_id: UserId,
        target_id: UserId,
        username: String,
        is_operator: bool,
    },
    Ban {
        room_id: RoomId,
        user_id: UserId,
        target_id: UserId,
        username: String,
        is_banned: bool,
        room_deleted: bool,
    },
    Kick {
        room_id: RoomId,
        user_id: UserId,
        target_id: UserId,
        username: String,
        room_deleted: bool,
    },
    TogglePrivate { room: RoomInfo, user_id: UserId },
    SetPassword { room: RoomInfo, user_id: UserId },
    Invite { invite: InviteInfo },
    AcceptInvite {
        room: RoomInfo,
        user_id: UserId,
        username: String,
    },
    RefuseInvite { invite_id: InviteId, user_id: UserId },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationError,
    NotFound,
    PermissionDenied,
    Conflict,
    /// Inbound frame could not be parsed
    InvalidMessage,
    Internal,
}

/// Convert ChatError to ServerMessage for client notification
impl From<ChatError> for ServerMessage {
    fn from(err: ChatError) -> Self {
        let code = match &err {
            ChatError::Authentication(_) => ErrorCode::AuthenticationError,
            ChatError::NotFound(_) => ErrorCode::NotFound,
            ChatError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ChatError::Conflict(_) => ErrorCode::Conflict,
            ChatError::Credential(_) | ChatError::Store(_) => ErrorCode::Internal,
        };
        let message = match code {
            // Backend details stay in the logs
            ErrorCode::Internal => "Internal error".to_string(),
            _ => err.to_string(),
        };
        ServerMessage::Error { code, message }
    }
}

impl ServerMessage {
    pub fn invalid_message(err: &serde_json::Error) -> Self {
        ServerMessage::Error {
            code: ErrorCode::InvalidMessage,
            message: format!("Invalid message format: {}", err),
        }
    }
}
