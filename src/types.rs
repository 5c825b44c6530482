//! Basic type definitions for the chat core
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: UUID-based identifier of one live connection
//! - `UserId`, `RoomId`, `ParticipantId`, `InviteId`, `MessageId`: store record ids
//! - `Group`: name of a broadcast group

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. One user may hold several connections at once,
/// each with its own `ClientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// User id, owned by the external identity store
    UserId
);
record_id!(
    /// Room id
    RoomId
);
record_id!(
    /// Participant row id
    ParticipantId
);
record_id!(
    /// Invite id
    InviteId
);
record_id!(
    /// Chat message id
    MessageId
);

/// Broadcast group a connection can belong to
///
/// Every authenticated connection is in exactly one `User` group, in the
/// `Lobby` (the discoverability feed), and in one `Room` group per room
/// the user is a non-banned participant of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Private group of every connection of one user
    User(UserId),
    /// Everyone currently following a room
    Room(RoomId),
    /// Every authenticated connection
    Lobby,
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Group::User(id) => write!(f, "user{}", id),
            Group::Room(id) => write!(f, "chat{}", id),
            Group::Lobby => write!(f, "lobby"),
        }
    }
}
