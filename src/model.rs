//! Store records
//!
//! Users, rooms, participants, invites and messages as the store hands
//! them back, plus the insert/update shapes the managers hand to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{InviteId, MessageId, ParticipantId, RoomId, UserId};

/// Name prefix reserved for direct-message rooms
pub const DM_PREFIX: &str = "DM:";

/// A user, as known to the external identity store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// A chat room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub is_direct_message: bool,
    /// Empty when the room has no password
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

/// Operator role of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    #[default]
    Regular,
    Operator,
}

impl OperatorStatus {
    pub fn toggled(self) -> Self {
        match self {
            OperatorStatus::Regular => OperatorStatus::Operator,
            OperatorStatus::Operator => OperatorStatus::Regular,
        }
    }
}

/// Ban state of a participant
///
/// Unbanning deletes the participant row, so there is no transition
/// back from `Banned` to `Member` on the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanStatus {
    #[default]
    Member,
    Banned,
}

/// Membership of one user in one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub is_owner: bool,
    pub operator: OperatorStatus,
    pub ban: BanStatus,
    /// Privileges are suspended while `now < muted_until`
    pub muted_until: DateTime<Utc>,
}

impl Participant {
    pub fn is_operator(&self) -> bool {
        self.operator == OperatorStatus::Operator
    }

    /// Operator privileges: operator or owner
    pub fn has_operator_privileges(&self) -> bool {
        self.is_operator() || self.is_owner
    }

    pub fn is_banned(&self) -> bool {
        self.ban == BanStatus::Banned
    }

    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until > now
    }
}

/// Room together with its participants (explicit relation expansion)
#[derive(Debug, Clone)]
pub struct RoomWithParticipants {
    pub room: Room,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteKind {
    Chat,
    Game,
    Friend,
}

/// A time-bounded offer to join a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub id: InviteId,
    pub kind: InviteKind,
    pub sender_id: UserId,
    pub invited_id: UserId,
    pub room_id: RoomId,
    pub expires_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub room_id: RoomId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub is_private: bool,
    pub is_direct_message: bool,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomUpdate {
    pub is_private: Option<bool>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub is_owner: bool,
    pub operator: OperatorStatus,
    pub muted_until: DateTime<Utc>,
}

impl NewParticipant {
    /// Plain member, not muted
    pub fn member(user_id: UserId, room_id: RoomId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            room_id,
            is_owner: false,
            operator: OperatorStatus::Regular,
            muted_until: now,
        }
    }

    /// Room creator: owner and operator
    pub fn owner(user_id: UserId, room_id: RoomId, now: DateTime<Utc>) -> Self {
        Self {
            is_owner: true,
            operator: OperatorStatus::Operator,
            ..Self::member(user_id, room_id, now)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantUpdate {
    pub operator: Option<OperatorStatus>,
    pub ban: Option<BanStatus>,
    pub muted_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewInvite {
    pub kind: InviteKind,
    pub sender_id: UserId,
    pub invited_id: UserId,
    pub room_id: RoomId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub room_id: RoomId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Query shape for invites; `None` fields match anything
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteFilter {
    pub sender_id: Option<UserId>,
    pub invited_id: Option<UserId>,
    pub room_id: Option<RoomId>,
}
