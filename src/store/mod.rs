//! Room store boundary
//!
//! Durable CRUD for users (read-only), rooms, participants, messages and
//! invites. Each call is atomic on its own; nothing here spans calls.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    Invite, InviteFilter, Message, NewInvite, NewMessage, NewParticipant, NewRoom, Participant,
    ParticipantUpdate, Room, RoomUpdate, RoomWithParticipants, User,
};
use crate::types::{InviteId, ParticipantId, RoomId, UserId};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RoomStore: Send + Sync {
    // Users
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;

    // Rooms
    async fn find_rooms(&self) -> StoreResult<Vec<Room>>;
    async fn find_room(&self, id: RoomId) -> StoreResult<Option<Room>>;
    async fn find_room_by_name(&self, name: &str) -> StoreResult<Option<Room>>;
    async fn find_room_with_participants(
        &self,
        id: RoomId,
    ) -> StoreResult<Option<RoomWithParticipants>>;
    /// Fails `UniqueViolation` if the name is taken
    async fn create_room(&self, room: NewRoom) -> StoreResult<Room>;
    async fn update_room(&self, id: RoomId, update: RoomUpdate) -> StoreResult<Room>;
    /// Cascades participants and invites. Deleting a missing room is a no-op.
    async fn delete_room(&self, id: RoomId) -> StoreResult<()>;

    // Participants
    async fn find_participant(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> StoreResult<Option<Participant>>;
    async fn find_participants_by_room(&self, room_id: RoomId) -> StoreResult<Vec<Participant>>;
    async fn find_participants_by_user(&self, user_id: UserId) -> StoreResult<Vec<Participant>>;
    /// Fails `NotFound` if the room is gone, `UniqueViolation` on a duplicate
    async fn create_participant(&self, participant: NewParticipant) -> StoreResult<Participant>;
    async fn update_participant(
        &self,
        id: ParticipantId,
        update: ParticipantUpdate,
    ) -> StoreResult<Participant>;
    async fn delete_participant(&self, id: ParticipantId) -> StoreResult<()>;

    // Messages
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;
    async fn find_messages_by_room(&self, room_id: RoomId) -> StoreResult<Vec<Message>>;
    async fn delete_messages_by_room(&self, room_id: RoomId) -> StoreResult<()>;

    // Invites
    async fn find_invites(&self, filter: InviteFilter) -> StoreResult<Vec<Invite>>;
    async fn find_invite(&self, id: InviteId) -> StoreResult<Option<Invite>>;
    async fn create_invite(&self, invite: NewInvite) -> StoreResult<Invite>;
    async fn update_invite_expiry(
        &self,
        id: InviteId,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<Invite>;
    /// Deleting a missing invite is a no-op
    async fn delete_invite(&self, id: InviteId) -> StoreResult<()>;
}
