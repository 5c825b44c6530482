//! Room lifecycle
//!
//! Creates and deletes rooms. Creation writes the room first and the
//! owning participant second; if the second write fails the room is
//! deleted again before the error is returned.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::auth::CredentialService;
use crate::clock::Clock;
use crate::error::{ChatError, StoreError};
use crate::model::{NewParticipant, NewRoom, Participant, Room, RoomUpdate, User, DM_PREFIX};
use crate::permissions::{require_owner, require_participant, require_room_exists};
use crate::store::RoomStore;
use crate::types::{RoomId, UserId};

/// Room-side capabilities the participant and invite managers depend on
#[async_trait]
pub trait RoomLifecycle: Send + Sync {
    async fn room(&self, room_id: RoomId) -> Result<Room, ChatError>;

    /// Fails `PermissionDenied` unless `password` matches the room password
    async fn verify_password(&self, room: &Room, password: &str) -> Result<(), ChatError>;

    /// Delete a participant row, then delete the room if it was abandoned.
    /// Returns whether the room was deleted.
    async fn remove_participant(&self, participant: &Participant) -> Result<bool, ChatError>;
}

/// A freshly created direct-message room and its two members
#[derive(Debug, Clone)]
pub struct DirectMessageRoom {
    pub room: Room,
    pub users: [User; 2],
}

pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    credentials: Arc<dyn CredentialService>,
    clock: Arc<dyn Clock>,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        credentials: Arc<dyn CredentialService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            clock,
        }
    }

    /// Create a regular room owned by `owner_id`
    pub async fn create_room(
        &self,
        owner_id: UserId,
        name: &str,
        password: Option<&str>,
        is_private: bool,
    ) -> Result<Room, ChatError> {
        let owner = self.user(owner_id).await?;
        let name = name.trim();
        if name.starts_with(DM_PREFIX) {
            return Err(ChatError::Conflict(format!(
                "'{}': room name cannot start with \"{}\"",
                name, DM_PREFIX
            )));
        }
        self.check_name_available(name).await?;

        let password_hash = self.credentials.hash(password.unwrap_or(""))?;
        let now = self.clock.now();
        let room = self
            .insert_room(NewRoom {
                name: name.to_string(),
                is_private,
                is_direct_message: false,
                password_hash,
                created_at: now,
            })
            .await?;

        let owner_row = NewParticipant::owner(owner.id, room.id, now);
        if let Err(e) = self.store.create_participant(owner_row).await {
            self.compensate(&room).await;
            return Err(e.into());
        }

        info!("User {} created room {} '{}'", owner.id, room.id, room.name);
        Ok(room)
    }

    /// Create the direct-message room between two users
    pub async fn create_direct_message_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<DirectMessageRoom, ChatError> {
        if user_a == user_b {
            return Err(ChatError::Conflict(
                "cannot open a direct message with yourself".to_string(),
            ));
        }
        let first = self.user(user_a).await?;
        let second = self.user(user_b).await?;

        let name = direct_message_name(&first.username, &second.username);
        self.check_name_available(&name).await?;

        let now = self.clock.now();
        let room = self
            .insert_room(NewRoom {
                name,
                is_private: true,
                is_direct_message: true,
                password_hash: String::new(),
                created_at: now,
            })
            .await?;

        for user in [&first, &second] {
            let row = NewParticipant::member(user.id, room.id, now);
            if let Err(e) = self.store.create_participant(row).await {
                self.compensate(&room).await;
                return Err(e.into());
            }
        }

        info!("Direct message room {} opened between {} and {}", room.id, first.id, second.id);
        Ok(DirectMessageRoom {
            room,
            users: [first, second],
        })
    }

    /// Delete a room: its messages first, then the room row
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.store.delete_messages_by_room(room_id).await?;
        self.store.delete_room(room_id).await?;
        info!("Room {} deleted", room_id);
        Ok(())
    }

    /// Owner-initiated delete
    pub async fn delete_room_as(&self, actor: UserId, room_id: RoomId) -> Result<Room, ChatError> {
        let room = self.room(room_id).await?;
        let participant = self.participant(actor, room_id).await?;
        require_owner(&participant)?;
        self.delete_room(room_id).await?;
        Ok(room)
    }

    /// Flip the private flag; owner only
    pub async fn toggle_private(&self, actor: UserId, room_id: RoomId) -> Result<Room, ChatError> {
        let participant = self.participant(actor, room_id).await?;
        let room = self.room(room_id).await?;
        require_owner(&participant)?;

        let update = RoomUpdate {
            is_private: Some(!room.is_private),
            ..RoomUpdate::default()
        };
        let room = self.store.update_room(room_id, update).await?;
        debug!("Room {} is now {}", room_id, if room.is_private { "private" } else { "public" });
        Ok(room)
    }

    /// Replace the room password; an empty password removes it. Owner only.
    pub async fn set_password(
        &self,
        actor: UserId,
        room_id: RoomId,
        password: &str,
    ) -> Result<Room, ChatError> {
        self.room(room_id).await?;
        let participant = self.participant(actor, room_id).await?;
        require_owner(&participant)?;

        let update = RoomUpdate {
            password_hash: Some(self.credentials.hash(password)?),
            ..RoomUpdate::default()
        };
        Ok(self.store.update_room(room_id, update).await?)
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<Option<Room>, ChatError> {
        Ok(self.store.find_room(room_id).await?)
    }

    pub async fn public_rooms(&self) -> Result<Vec<Room>, ChatError> {
        let mut rooms = self.store.find_rooms().await?;
        rooms.retain(|r| !r.is_private);
        Ok(rooms)
    }

    pub async fn direct_message_rooms_for(&self, user_id: UserId) -> Result<Vec<Room>, ChatError> {
        let mut rooms = Vec::new();
        for participant in self.store.find_participants_by_user(user_id).await? {
            if let Some(room) = self.store.find_room(participant.room_id).await? {
                if room.is_direct_message {
                    rooms.push(room);
                }
            }
        }
        Ok(rooms)
    }

    async fn user(&self, user_id: UserId) -> Result<User, ChatError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user {} not found", user_id)))
    }

    async fn participant(&self, user_id: UserId, room_id: RoomId) -> Result<Participant, ChatError> {
        let participant = self.store.find_participant(user_id, room_id).await?;
        require_participant(participant, user_id, room_id)
    }

    async fn check_name_available(&self, name: &str) -> Result<(), ChatError> {
        if name.is_empty() {
            return Err(ChatError::Conflict("room name must not be empty".to_string()));
        }
        if self.store.find_room_by_name(name).await?.is_some() {
            return Err(ChatError::Conflict(format!(
                "'{}': a room with this name already exists",
                name
            )));
        }
        Ok(())
    }

    async fn insert_room(&self, new: NewRoom) -> Result<Room, ChatError> {
        let name = new.name.clone();
        self.store.create_room(new).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => {
                ChatError::Conflict(format!("'{}': a room with this name already exists", name))
            }
            other => other.into(),
        })
    }

    /// Undo a room insert whose participants could not be written
    async fn compensate(&self, room: &Room) {
        if let Err(e) = self.delete_room(room.id).await {
            error!("Failed to remove orphan room {}: {}", room.id, e);
        }
    }
}

#[async_trait]
impl RoomLifecycle for RoomManager {
    async fn room(&self, room_id: RoomId) -> Result<Room, ChatError> {
        let room = self.store.find_room(room_id).await?;
        require_room_exists(room, room_id)
    }

    async fn verify_password(&self, room: &Room, password: &str) -> Result<(), ChatError> {
        if !self.credentials.verify(password, &room.password_hash) {
            return Err(ChatError::PermissionDenied(format!(
                "invalid password for room {}",
                room.name
            )));
        }
        Ok(())
    }

    async fn remove_participant(&self, participant: &Participant) -> Result<bool, ChatError> {
        self.store.delete_participant(participant.id).await?;

        let Some(expanded) = self
            .store
            .find_room_with_participants(participant.room_id)
            .await?
        else {
            return Ok(false);
        };

        let owner_left = participant.is_owner && !expanded.room.is_direct_message;
        if expanded.participants.is_empty() || owner_left {
            debug!(
                "Room {} abandoned (owner left: {}), deleting",
                expanded.room.id, owner_left
            );
            self.delete_room(expanded.room.id).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Canonical DM room name; the same for either argument order
pub fn direct_message_name(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{} {} {}", DM_PREFIX, low, high)
}
