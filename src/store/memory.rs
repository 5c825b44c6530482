//! In-memory `RoomStore`
//!
//! Tables behind one `RwLock`; every trait call takes the lock once, which
//! gives the per-record atomicity the managers rely on.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{RoomStore, StoreResult};
use crate::error::StoreError;
use crate::model::{
    BanStatus, Invite, InviteFilter, Message, NewInvite, NewMessage, NewParticipant, NewRoom,
    Participant, ParticipantUpdate, Room, RoomUpdate, RoomWithParticipants, User,
};
use crate::types::{InviteId, MessageId, ParticipantId, RoomId, UserId};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    rooms: BTreeMap<RoomId, Room>,
    participants: BTreeMap<ParticipantId, Participant>,
    messages: BTreeMap<MessageId, Message>,
    invites: BTreeMap<InviteId, Invite>,
    next_id: i64,
    /// Participant inserts for these users fail (fault injection)
    rejected_participants: HashSet<UserId>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Seed a store with known users
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let tables = Tables {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            ..Tables::default()
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Make every later participant insert for `user_id` fail
    pub async fn reject_participants_for(&self, user_id: UserId) {
        self.tables
            .write()
            .await
            .rejected_participants
            .insert(user_id);
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_rooms(&self) -> StoreResult<Vec<Room>> {
        Ok(self.tables.read().await.rooms.values().cloned().collect())
    }

    async fn find_room(&self, id: RoomId) -> StoreResult<Option<Room>> {
        Ok(self.tables.read().await.rooms.get(&id).cloned())
    }

    async fn find_room_by_name(&self, name: &str) -> StoreResult<Option<Room>> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.values().find(|r| r.name == name).cloned())
    }

    async fn find_room_with_participants(
        &self,
        id: RoomId,
    ) -> StoreResult<Option<RoomWithParticipants>> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.get(&id).map(|room| RoomWithParticipants {
            room: room.clone(),
            participants: tables
                .participants
                .values()
                .filter(|p| p.room_id == id)
                .cloned()
                .collect(),
        }))
    }

    async fn create_room(&self, new: NewRoom) -> StoreResult<Room> {
        let mut tables = self.tables.write().await;
        if new.name.is_empty() {
            return Err(StoreError::Unavailable("room name must not be empty".into()));
        }
        if tables.rooms.values().any(|r| r.name == new.name) {
            return Err(StoreError::UniqueViolation(format!("room name '{}'", new.name)));
        }
        let room = Room {
            id: RoomId(tables.next_id()),
            name: new.name,
            is_private: new.is_private,
            is_direct_message: new.is_direct_message,
            password_hash: new.password_hash,
            created_at: new.created_at,
        };
        tables.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn update_room(&self, id: RoomId, update: RoomUpdate) -> StoreResult<Room> {
        let mut tables = self.tables.write().await;
        let room = tables
            .rooms
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("room {}", id)))?;
        if let Some(is_private) = update.is_private {
            room.is_private = is_private;
        }
        if let Some(hash) = update.password_hash {
            room.password_hash = hash;
        }
        Ok(room.clone())
    }

    async fn delete_room(&self, id: RoomId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.rooms.remove(&id);
        tables.participants.retain(|_, p| p.room_id != id);
        tables.invites.retain(|_, i| i.room_id != id);
        Ok(())
    }

    async fn find_participant(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> StoreResult<Option<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .values()
            .find(|p| p.user_id == user_id && p.room_id == room_id)
            .cloned())
    }

    async fn find_participants_by_room(&self, room_id: RoomId) -> StoreResult<Vec<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn find_participants_by_user(&self, user_id: UserId) -> StoreResult<Vec<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_participant(&self, new: NewParticipant) -> StoreResult<Participant> {
        let mut tables = self.tables.write().await;
        if tables.rejected_participants.contains(&new.user_id) {
            return Err(StoreError::Unavailable(format!(
                "participant insert rejected for user {}",
                new.user_id
            )));
        }
        if !tables.users.contains_key(&new.user_id) {
            return Err(StoreError::NotFound(format!("user {}", new.user_id)));
        }
        if !tables.rooms.contains_key(&new.room_id) {
            return Err(StoreError::NotFound(format!("room {}", new.room_id)));
        }
        if tables
            .participants
            .values()
            .any(|p| p.user_id == new.user_id && p.room_id == new.room_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "participant {} in room {}",
                new.user_id, new.room_id
            )));
        }
        let participant = Participant {
            id: ParticipantId(tables.next_id()),
            user_id: new.user_id,
            room_id: new.room_id,
            is_owner: new.is_owner,
            operator: new.operator,
            ban: BanStatus::Member,
            muted_until: new.muted_until,
        };
        tables.participants.insert(participant.id, participant.clone());
        Ok(participant)
    }

    async fn update_participant(
        &self,
        id: ParticipantId,
        update: ParticipantUpdate,
    ) -> StoreResult<Participant> {
        let mut tables = self.tables.write().await;
        let participant = tables
            .participants
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("participant {}", id)))?;
        if let Some(operator) = update.operator {
            participant.operator = operator;
        }
        if let Some(ban) = update.ban {
            participant.ban = ban;
        }
        if let Some(muted_until) = update.muted_until {
            participant.muted_until = muted_until;
        }
        Ok(participant.clone())
    }

    async fn delete_participant(&self, id: ParticipantId) -> StoreResult<()> {
        self.tables.write().await.participants.remove(&id);
        Ok(())
    }

    async fn create_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(&new.room_id) {
            return Err(StoreError::NotFound(format!("room {}", new.room_id)));
        }
        let message = Message {
            id: MessageId(tables.next_id()),
            sender_id: new.sender_id,
            room_id: new.room_id,
            content: new.content,
            sent_at: new.sent_at,
        };
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_messages_by_room(&self, room_id: RoomId) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn delete_messages_by_room(&self, room_id: RoomId) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .messages
            .retain(|_, m| m.room_id != room_id);
        Ok(())
    }

    async fn find_invites(&self, filter: InviteFilter) -> StoreResult<Vec<Invite>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invites
            .values()
            .filter(|i| filter.sender_id.map_or(true, |id| i.sender_id == id))
            .filter(|i| filter.invited_id.map_or(true, |id| i.invited_id == id))
            .filter(|i| filter.room_id.map_or(true, |id| i.room_id == id))
            .cloned()
            .collect())
    }

    async fn find_invite(&self, id: InviteId) -> StoreResult<Option<Invite>> {
        Ok(self.tables.read().await.invites.get(&id).cloned())
    }

    async fn create_invite(&self, new: NewInvite) -> StoreResult<Invite> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(&new.room_id) {
            return Err(StoreError::NotFound(format!("room {}", new.room_id)));
        }
        let invite = Invite {
            id: InviteId(tables.next_id()),
            kind: new.kind,
            sender_id: new.sender_id,
            invited_id: new.invited_id,
            room_id: new.room_id,
            expires_at: new.expires_at,
        };
        tables.invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    async fn update_invite_expiry(
        &self,
        id: InviteId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Invite> {
        let mut tables = self.tables.write().await;
        let invite = tables
            .invites
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invite {}", id)))?;
        invite.expires_at = expires_at;
        Ok(invite.clone())
    }

    async fn delete_invite(&self, id: InviteId) -> StoreResult<()> {
        self.tables.write().await.invites.remove(&id);
        Ok(())
    }
}
