//! Permission checks
//!
//! Pure functions over a participant and/or room. No I/O, no mutation.
//! Callers chain them in a fixed order per action; the order only decides
//! which error is surfaced first.

use chrono::{DateTime, Utc};

use crate::error::ChatError;
use crate::model::{Invite, Participant, Room};
use crate::types::{RoomId, UserId};

pub fn require_room_exists(room: Option<Room>, room_id: RoomId) -> Result<Room, ChatError> {
    room.ok_or_else(|| ChatError::NotFound(format!("room {} does not exist", room_id)))
}

pub fn require_participant(
    participant: Option<Participant>,
    user_id: UserId,
    room_id: RoomId,
) -> Result<Participant, ChatError> {
    participant.ok_or_else(|| {
        ChatError::NotFound(format!("user {} is not a member of room {}", user_id, room_id))
    })
}

pub fn require_owner(participant: &Participant) -> Result<(), ChatError> {
    if !participant.is_owner {
        return Err(ChatError::PermissionDenied(format!(
            "user {} is not owner of room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

pub fn require_not_owner(participant: &Participant) -> Result<(), ChatError> {
    if participant.is_owner {
        return Err(ChatError::PermissionDenied(format!(
            "user {} is owner of room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

pub fn require_operator_or_owner(participant: &Participant) -> Result<(), ChatError> {
    if !participant.has_operator_privileges() {
        return Err(ChatError::PermissionDenied(format!(
            "user {} does not have operator privileges in room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

pub fn require_not_operator_or_owner(participant: &Participant) -> Result<(), ChatError> {
    if participant.has_operator_privileges() {
        return Err(ChatError::PermissionDenied(format!(
            "user {} is an operator of room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

pub fn require_not_banned(participant: &Participant) -> Result<(), ChatError> {
    if participant.is_banned() {
        return Err(ChatError::PermissionDenied(format!(
            "user {} is banned from room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

pub fn require_not_muted(participant: &Participant, now: DateTime<Utc>) -> Result<(), ChatError> {
    if participant.is_muted_at(now) {
        return Err(ChatError::PermissionDenied(format!(
            "user {} is muted in room {}",
            participant.user_id, participant.room_id
        )));
    }
    Ok(())
}

/// The caller must delete the invite when this fails
pub fn require_invite_live(invite: &Invite, now: DateTime<Utc>) -> Result<(), ChatError> {
    if !invite.is_live_at(now) {
        return Err(ChatError::PermissionDenied(format!(
            "invite of user {} to room {} has expired",
            invite.invited_id, invite.room_id
        )));
    }
    Ok(())
}

pub fn require_room_public(room: &Room) -> Result<(), ChatError> {
    if room.is_private {
        return Err(ChatError::PermissionDenied(format!(
            "room {} is private",
            room.id
        )));
    }
    Ok(())
}

pub fn require_not_direct_message(room: &Room) -> Result<(), ChatError> {
    if room.is_direct_message {
        return Err(ChatError::Conflict(format!(
            "room {} is a direct message",
            room.id
        )));
    }
    Ok(())
}
