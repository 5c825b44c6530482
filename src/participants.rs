//! Participants and membership
//!
//! Join/leave, moderation (mute, operator, ban, kick), message sending and
//! membership queries. Every mutation runs its permission checks first.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{ChatError, StoreError};
use crate::model::{
    BanStatus, Message, NewMessage, NewParticipant, Participant, ParticipantUpdate, Room,
};
use crate::permissions::{
    require_not_banned, require_not_muted, require_not_operator_or_owner, require_not_owner,
    require_operator_or_owner, require_owner, require_participant, require_room_public,
};
use crate::rooms::RoomLifecycle;
use crate::store::RoomStore;
use crate::types::{RoomId, UserId};

/// Membership capabilities the invite manager depends on
#[async_trait]
pub trait Membership: Send + Sync {
    async fn find_participant(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<Option<Participant>, ChatError>;

    /// Add a plain member; fails `Conflict` if already a participant
    async fn add_member(&self, user_id: UserId, room_id: RoomId) -> Result<Participant, ChatError>;
}

/// Result of a ban toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanOutcome {
    Banned(Participant),
    /// The ban record was deleted; the room may have gone with it
    Unbanned { room_deleted: bool },
}

pub struct ParticipantManager {
    store: Arc<dyn RoomStore>,
    rooms: Arc<dyn RoomLifecycle>,
    clock: Arc<dyn Clock>,
}

impl ParticipantManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        rooms: Arc<dyn RoomLifecycle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            rooms,
            clock,
        }
    }

    /// Join a public room, checking its password if it has one
    pub async fn join(
        &self,
        user_id: UserId,
        room_id: RoomId,
        password: &str,
    ) -> Result<(Room, Participant), ChatError> {
        let room = self.rooms.room(room_id).await?;
        require_room_public(&room)?;
        if let Some(existing) = self.store.find_participant(user_id, room_id).await? {
            require_not_banned(&existing)?;
            return Err(ChatError::Conflict(format!(
                "user {} is already in room {}",
                user_id, room_id
            )));
        }
        self.rooms.verify_password(&room, password).await?;

        let participant = self.add_member(user_id, room_id).await?;
        info!("User {} joined room {}", user_id, room_id);
        Ok((room, participant))
    }

    /// Leave a room. Returns whether the room was deleted as a result.
    pub async fn leave(&self, user_id: UserId, room_id: RoomId) -> Result<bool, ChatError> {
        self.rooms.room(room_id).await?;
        let participant = self.participant(user_id, room_id).await?;
        // The banned row is what keeps the user out
        require_not_banned(&participant)?;
        let room_deleted = self.rooms.remove_participant(&participant).await?;
        info!("User {} left room {}", user_id, room_id);
        Ok(room_deleted)
    }

    /// Mute `target_id` for `minutes`; returns the new `muted_until`.
    ///
    /// If the actor is muted themselves, the target's mute is cleared
    /// instead of set.
    pub async fn mute(
        &self,
        actor_id: UserId,
        target_id: UserId,
        room_id: RoomId,
        minutes: i64,
    ) -> Result<DateTime<Utc>, ChatError> {
        let (actor, target) = self.actor_and_target(actor_id, target_id, room_id).await?;
        require_operator_or_owner(&actor)?;
        require_not_operator_or_owner(&target)?;
        require_not_banned(&target)?;

        let now = self.clock.now();
        let muted_until = if actor.is_muted_at(now) {
            now
        } else {
            Duration::try_minutes(minutes.max(0))
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| {
                    ChatError::Conflict(format!("invalid mute duration: {} minutes", minutes))
                })?
        };
        let update = ParticipantUpdate {
            muted_until: Some(muted_until),
            ..ParticipantUpdate::default()
        };
        self.store.update_participant(target.id, update).await?;
        debug!("User {} muted in room {} until {}", target_id, room_id, muted_until);
        Ok(muted_until)
    }

    /// Grant or revoke operator; owner only
    pub async fn toggle_operator(
        &self,
        actor_id: UserId,
        target_id: UserId,
        room_id: RoomId,
    ) -> Result<Participant, ChatError> {
        let (actor, target) = self.actor_and_target(actor_id, target_id, room_id).await?;
        require_owner(&actor)?;
        require_not_owner(&target)?;
        require_not_banned(&target)?;

        let update = ParticipantUpdate {
            operator: Some(target.operator.toggled()),
            ..ParticipantUpdate::default()
        };
        Ok(self.store.update_participant(target.id, update).await?)
    }

    /// Ban the target, or unban them if already banned
    pub async fn ban(
        &self,
        actor_id: UserId,
        target_id: UserId,
        room_id: RoomId,
    ) -> Result<BanOutcome, ChatError> {
        let (actor, target) = self.actor_and_target(actor_id, target_id, room_id).await?;
        require_operator_or_owner(&actor)?;
        require_not_owner(&target)?;

        match target.ban {
            BanStatus::Banned => {
                let room_deleted = self.rooms.remove_participant(&target).await?;
                info!("User {} unbanned from room {}", target_id, room_id);
                Ok(BanOutcome::Unbanned { room_deleted })
            }
            BanStatus::Member => {
                let update = ParticipantUpdate {
                    ban: Some(BanStatus::Banned),
                    ..ParticipantUpdate::default()
                };
                let banned = self.store.update_participant(target.id, update).await?;
                info!("User {} banned from room {}", target_id, room_id);
                Ok(BanOutcome::Banned(banned))
            }
        }
    }

    /// Remove the target from the room. Returns whether the room was deleted.
    pub async fn kick(
        &self,
        actor_id: UserId,
        target_id: UserId,
        room_id: RoomId,
    ) -> Result<bool, ChatError> {
        let (actor, target) = self.actor_and_target(actor_id, target_id, room_id).await?;
        require_operator_or_owner(&actor)?;
        require_not_owner(&target)?;
        require_not_banned(&target)?;

        let room_deleted = self.rooms.remove_participant(&target).await?;
        info!("User {} kicked from room {} by {}", target_id, room_id, actor_id);
        Ok(room_deleted)
    }

    pub async fn send_message(
        &self,
        sender_id: UserId,
        room_id: RoomId,
        content: String,
    ) -> Result<Message, ChatError> {
        self.rooms.room(room_id).await?;
        let sender = self.participant(sender_id, room_id).await?;
        let now = self.clock.now();
        require_not_muted(&sender, now)?;
        require_not_banned(&sender)?;

        let message = self
            .store
            .create_message(NewMessage {
                sender_id,
                room_id,
                content,
                sent_at: now,
            })
            .await?;
        Ok(message)
    }

    /// Rooms the user belongs to, excluding rooms they are banned from
    pub async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<Room>, ChatError> {
        let mut rooms = Vec::new();
        for participant in self.store.find_participants_by_user(user_id).await? {
            if participant.is_banned() {
                continue;
            }
            if let Some(room) = self.store.find_room(participant.room_id).await? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    pub async fn participants_of(&self, room_id: RoomId) -> Result<Vec<Participant>, ChatError> {
        Ok(self.store.find_participants_by_room(room_id).await?)
    }

    /// Room history, oldest first
    pub async fn messages_of(&self, room_id: RoomId) -> Result<Vec<Message>, ChatError> {
        let mut messages = self.store.find_messages_by_room(room_id).await?;
        messages.sort_by_key(|m| (m.sent_at, m.id));
        Ok(messages)
    }

    async fn participant(&self, user_id: UserId, room_id: RoomId) -> Result<Participant, ChatError> {
        let participant = self.store.find_participant(user_id, room_id).await?;
        require_participant(participant, user_id, room_id)
    }

    async fn actor_and_target(
        &self,
        actor_id: UserId,
        target_id: UserId,
        room_id: RoomId,
    ) -> Result<(Participant, Participant), ChatError> {
        self.rooms.room(room_id).await?;
        let actor = self.participant(actor_id, room_id).await?;
        let target = self.participant(target_id, room_id).await?;
        Ok((actor, target))
    }
}

#[async_trait]
impl Membership for ParticipantManager {
    async fn find_participant(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<Option<Participant>, ChatError> {
        Ok(self.store.find_participant(user_id, room_id).await?)
    }

    async fn add_member(&self, user_id: UserId, room_id: RoomId) -> Result<Participant, ChatError> {
        let row = NewParticipant::member(user_id, room_id, self.clock.now());
        self.store.create_participant(row).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => ChatError::Conflict(format!(
                "user {} is already in room {}",
                user_id, room_id
            )),
            StoreError::NotFound(what) => ChatError::NotFound(what),
            other => other.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Argon2Credentials;
    use crate::clock::ManualClock;
    use crate::model::User;
    use crate::rooms::RoomManager;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        rooms: Arc<RoomManager>,
        participants: ParticipantManager,
    }

    fn setup() -> Fixture {
        let store = Arc::new(MemoryStore::with_users(
            [(1, "alice"), (2, "bob"), (3, "carol"), (4, "dave")]
                .into_iter()
                .map(|(id, name)| User { id: UserId(id), username: name.into() }),
        ));
        let clock = Arc::new(ManualClock::default());
        let rooms = Arc::new(RoomManager::new(
            store.clone(),
            Arc::new(Argon2Credentials),
            clock.clone(),
        ));
        let participants = ParticipantManager::new(store.clone(), rooms.clone(), clock.clone());
        Fixture {
            store,
            clock,
            rooms,
            participants,
        }
    }

    async fn general(f: &Fixture) -> RoomId {
        let room = f.rooms.create_room(UserId(1), "general", None, false).await.unwrap();
        for user in [2, 3] {
            f.participants.join(UserId(user), room.id, "").await.unwrap();
        }
        room.id
    }

    #[tokio::test]
    async fn test_join_rules() {
        let f = setup();
        let room = f.rooms.create_room(UserId(1), "general", None, false).await.unwrap();

        f.participants.join(UserId(2), room.id, "").await.unwrap();
        assert!(matches!(
            f.participants.join(UserId(2), room.id, "").await,
            Err(ChatError::Conflict(_))
        ));

        let private = f.rooms.create_room(UserId(1), "hideout", None, true).await.unwrap();
        assert!(matches!(
            f.participants.join(UserId(2), private.id, "").await,
            Err(ChatError::PermissionDenied(_))
        ));

        assert!(matches!(
            f.participants.join(UserId(2), RoomId(999), "").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_join_checks_password() {
        let f = setup();
        let room = f
            .rooms
            .create_room(UserId(1), "locked", Some("sesame"), false)
            .await
            .unwrap();
        assert!(matches!(
            f.participants.join(UserId(2), room.id, "wrong").await,
            Err(ChatError::PermissionDenied(_))
        ));
        f.participants.join(UserId(2), room.id, "sesame").await.unwrap();
    }

    #[tokio::test]
    async fn test_banned_user_cannot_rejoin() {
        let f = setup();
        let room = general(&f).await;
        f.participants.ban(UserId(1), UserId(2), room).await.unwrap();
        assert!(matches!(
            f.participants.join(UserId(2), room, "").await,
            Err(ChatError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_mute_blocks_messages_until_expiry() {
        let f = setup();
        let room = general(&f).await;

        f.participants
            .send_message(UserId(2), room, "hello".into())
            .await
            .unwrap();

        let until = f.participants.mute(UserId(1), UserId(2), room, 5).await.unwrap();
        assert_eq!(until, f.clock.now() + Duration::minutes(5));

        let muted = f.participants.send_message(UserId(2), room, "again".into()).await;
        assert!(matches!(muted, Err(ChatError::PermissionDenied(_))));

        f.clock.advance(Duration::minutes(5));
        f.participants
            .send_message(UserId(2), room, "free".into())
            .await
            .unwrap();
        assert_eq!(f.participants.messages_of(room).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_mute_is_rejected() {
        let f = setup();
        let room = general(&f).await;

        for minutes in [1_000_000_000_000, i64::MAX] {
            assert!(matches!(
                f.participants.mute(UserId(1), UserId(2), room, minutes).await,
                Err(ChatError::Conflict(_))
            ));
        }
        let bob = f.store.find_participant(UserId(2), room).await.unwrap().unwrap();
        assert!(!bob.is_muted_at(f.clock.now()));
    }

    #[tokio::test]
    async fn test_muted_actor_clears_mute_instead() {
        let f = setup();
        let room = general(&f).await;

        // bob becomes operator while muted
        f.participants.mute(UserId(1), UserId(2), room, 10).await.unwrap();
        f.participants.toggle_operator(UserId(1), UserId(2), room).await.unwrap();

        let now = f.clock.now();
        let until = f.participants.mute(UserId(2), UserId(3), room, 30).await.unwrap();
        assert_eq!(until, now);
        let carol = f.store.find_participant(UserId(3), room).await.unwrap().unwrap();
        assert!(!carol.is_muted_at(now));
    }

    #[tokio::test]
    async fn test_mute_permissions() {
        let f = setup();
        let room = general(&f).await;

        assert!(matches!(
            f.participants.mute(UserId(2), UserId(3), room, 5).await,
            Err(ChatError::PermissionDenied(_))
        ));
        assert!(matches!(
            f.participants.mute(UserId(1), UserId(1), room, 5).await,
            Err(ChatError::PermissionDenied(_))
        ));
        assert!(matches!(
            f.participants.mute(UserId(1), UserId(4), room, 5).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_operator() {
        let f = setup();
        let room = general(&f).await;

        let bob = f.participants.toggle_operator(UserId(1), UserId(2), room).await.unwrap();
        assert!(bob.is_operator());
        // operators cannot grant
        assert!(matches!(
            f.participants.toggle_operator(UserId(2), UserId(3), room).await,
            Err(ChatError::PermissionDenied(_))
        ));
        let bob = f.participants.toggle_operator(UserId(1), UserId(2), room).await.unwrap();
        assert!(!bob.is_operator());
        assert!(f.participants.toggle_operator(UserId(1), UserId(1), room).await.is_err());
    }

    #[tokio::test]
    async fn test_ban_is_a_toggle() {
        let f = setup();
        let room = general(&f).await;

        let outcome = f.participants.ban(UserId(1), UserId(2), room).await.unwrap();
        assert!(matches!(outcome, BanOutcome::Banned(ref p) if p.is_banned()));
        let rooms = f.participants.rooms_for_user(UserId(2)).await.unwrap();
        assert!(rooms.is_empty());

        let outcome = f.participants.ban(UserId(1), UserId(2), room).await.unwrap();
        assert_eq!(outcome, BanOutcome::Unbanned { room_deleted: false });
        assert!(f.store.find_participant(UserId(2), room).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_cannot_be_banned() {
        let f = setup();
        let room = general(&f).await;
        f.participants.toggle_operator(UserId(1), UserId(2), room).await.unwrap();
        assert!(matches!(
            f.participants.ban(UserId(2), UserId(1), room).await,
            Err(ChatError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_kick() {
        let f = setup();
        let room = general(&f).await;

        assert!(matches!(
            f.participants.kick(UserId(2), UserId(3), room).await,
            Err(ChatError::PermissionDenied(_))
        ));
        assert!(!f.participants.kick(UserId(1), UserId(3), room).await.unwrap());
        assert!(f.store.find_participant(UserId(3), room).await.unwrap().is_none());

        f.participants.ban(UserId(1), UserId(2), room).await.unwrap();
        assert!(matches!(
            f.participants.kick(UserId(1), UserId(2), room).await,
            Err(ChatError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_banned_participant_cannot_send() {
        let f = setup();
        let room = general(&f).await;
        f.participants.ban(UserId(1), UserId(2), room).await.unwrap();
        assert!(matches!(
            f.participants.send_message(UserId(2), room, "hi".into()).await,
            Err(ChatError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_leaving_removes_room_from_member_lists() {
        let f = setup();
        let room = f.rooms.create_room(UserId(1), "general", None, false).await.unwrap();
        f.participants.join(UserId(2), room.id, "").await.unwrap();
        assert_eq!(f.participants.rooms_for_user(UserId(2)).await.unwrap().len(), 1);

        assert!(f.participants.leave(UserId(1), room.id).await.unwrap());
        assert!(f.participants.rooms_for_user(UserId(2)).await.unwrap().is_empty());
        assert!(f.rooms.find_room(room.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_banned_user_cannot_leave_to_rejoin() {
        let f = setup();
        let room = general(&f).await;
        f.participants.ban(UserId(1), UserId(2), room).await.unwrap();

        assert!(matches!(
            f.participants.leave(UserId(2), room).await,
            Err(ChatError::PermissionDenied(_))
        ));
        assert!(matches!(
            f.participants.join(UserId(2), room, "").await,
            Err(ChatError::PermissionDenied(_))
        ));
        let bob = f.store.find_participant(UserId(2), room).await.unwrap().unwrap();
        assert!(bob.is_banned());
    }

    #[tokio::test]
    async fn test_member_leaving_keeps_room() {
        let f = setup();
        let room = general(&f).await;
        assert!(!f.participants.leave(UserId(2), room).await.unwrap());
        assert_eq!(f.participants.participants_of(room).await.unwrap().len(), 2);
        assert!(matches!(
            f.participants.leave(UserId(2), room).await,
            Err(ChatError::NotFound(_))
        ));
    }
}
