//! Invite lifecycle
//!
//! Invites are created with a fixed lifetime and deleted on accept, refuse
//! or expiry. Expiry is swept lazily: every operation here first deletes
//! the invites whose `expires_at` has passed.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::ChatError;
use crate::model::{Invite, InviteFilter, InviteKind, NewInvite, Participant, Room, User};
use crate::participants::Membership;
use crate::permissions::{
    require_invite_live, require_not_banned, require_not_direct_message, require_participant,
};
use crate::rooms::RoomLifecycle;
use crate::store::RoomStore;
use crate::types::{InviteId, RoomId, UserId};

pub struct InviteManager {
    store: Arc<dyn RoomStore>,
    membership: Arc<dyn Membership>,
    rooms: Arc<dyn RoomLifecycle>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InviteManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        membership: Arc<dyn Membership>,
        rooms: Arc<dyn RoomLifecycle>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            membership,
            rooms,
            clock,
            ttl,
        }
    }

    /// Invite `invited_id` to a room, or refresh the expiry of the
    /// existing invite for the same sender, invitee and room
    pub async fn create_invite(
        &self,
        kind: InviteKind,
        sender_id: UserId,
        invited_id: UserId,
        room_id: RoomId,
    ) -> Result<Invite, ChatError> {
        match kind {
            InviteKind::Chat => {}
            InviteKind::Game | InviteKind::Friend => {
                return Err(ChatError::Conflict(format!(
                    "{:?} invites are not supported",
                    kind
                )));
            }
        }
        self.sweep_expired().await?;

        self.user(sender_id).await?;
        self.user(invited_id).await?;
        let room = self.rooms.room(room_id).await?;
        require_not_direct_message(&room)?;

        let sender = self.membership.find_participant(sender_id, room_id).await?;
        let sender = require_participant(sender, sender_id, room_id)?;
        require_not_banned(&sender)?;

        if self
            .membership
            .find_participant(invited_id, room_id)
            .await?
            .is_some()
        {
            return Err(ChatError::Conflict(format!(
                "user {} cannot be invited: already in room {}",
                invited_id, room_id
            )));
        }

        let expires_at = self.clock.now() + self.ttl;
        let filter = InviteFilter {
            sender_id: Some(sender_id),
            invited_id: Some(invited_id),
            room_id: Some(room_id),
        };
        let existing = self
            .store
            .find_invites(filter)
            .await?
            .into_iter()
            .find(|i| i.kind == InviteKind::Chat);

        let invite = match existing {
            Some(invite) => {
                debug!("Refreshing invite {}", invite.id);
                self.store.update_invite_expiry(invite.id, expires_at).await?
            }
            None => {
                self.store
                    .create_invite(NewInvite {
                        kind,
                        sender_id,
                        invited_id,
                        room_id,
                        expires_at,
                    })
                    .await?
            }
        };
        info!("User {} invited user {} to room {}", sender_id, invited_id, room_id);
        Ok(invite)
    }

    /// Accept a live invite to `room_id`, becoming a participant.
    /// Deletes every invite for this user and room.
    pub async fn accept_invite(
        &self,
        user_id: UserId,
        room_id: RoomId,
        password: &str,
    ) -> Result<(Room, Participant), ChatError> {
        let expired = self.sweep_expired().await?;

        let filter = InviteFilter {
            invited_id: Some(user_id),
            room_id: Some(room_id),
            ..InviteFilter::default()
        };
        let invites = self.store.find_invites(filter).await?;
        let Some(invite) = invites.first() else {
            let lapsed = expired
                .iter()
                .any(|i| i.invited_id == user_id && i.room_id == room_id);
            return Err(ChatError::PermissionDenied(if lapsed {
                format!("invite of user {} to room {} has expired", user_id, room_id)
            } else {
                format!("user {} has not been invited to room {}", user_id, room_id)
            }));
        };
        if let Err(e) = require_invite_live(invite, self.clock.now()) {
            self.store.delete_invite(invite.id).await?;
            return Err(e);
        }

        let room = self.rooms.room(room_id).await?;
        require_not_direct_message(&room)?;
        if let Some(existing) = self.membership.find_participant(user_id, room_id).await? {
            require_not_banned(&existing)?;
            return Err(ChatError::Conflict(format!(
                "user {} has already joined room {}",
                user_id, room_id
            )));
        }
        self.rooms.verify_password(&room, password).await?;

        let participant = self.membership.add_member(user_id, room_id).await?;
        for invite in &invites {
            self.store.delete_invite(invite.id).await?;
        }
        info!("User {} accepted invite to room {}", user_id, room_id);
        Ok((room, participant))
    }

    /// Delete an invite. Returns the invite if it still existed.
    pub async fn refuse_invite(&self, invite_id: InviteId) -> Result<Option<Invite>, ChatError> {
        self.sweep_expired().await?;
        let invite = self.store.find_invite(invite_id).await?;
        self.store.delete_invite(invite_id).await?;
        debug!("Invite {} refused", invite_id);
        Ok(invite)
    }

    /// Delete every expired invite; returns what was deleted
    pub async fn sweep_expired(&self) -> Result<Vec<Invite>, ChatError> {
        let now = self.clock.now();
        let expired: Vec<Invite> = self
            .store
            .find_invites(InviteFilter::default())
            .await?
            .into_iter()
            .filter(|i| !i.is_live_at(now))
            .collect();
        for invite in &expired {
            self.store.delete_invite(invite.id).await?;
        }
        if !expired.is_empty() {
            debug!("Swept {} expired invites", expired.len());
        }
        Ok(expired)
    }

    pub async fn fetch_invite(&self, invite_id: InviteId) -> Result<Invite, ChatError> {
        self.sweep_expired().await?;
        self.store
            .find_invite(invite_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("invite {} not found", invite_id)))
    }

    pub async fn invites_received_by(&self, user_id: UserId) -> Result<Vec<Invite>, ChatError> {
        self.query(InviteFilter {
            invited_id: Some(user_id),
            ..InviteFilter::default()
        })
        .await
    }

    pub async fn invites_sent_by(&self, user_id: UserId) -> Result<Vec<Invite>, ChatError> {
        self.query(InviteFilter {
            sender_id: Some(user_id),
            ..InviteFilter::default()
        })
        .await
    }

    pub async fn invites_for_room(&self, room_id: RoomId) -> Result<Vec<Invite>, ChatError> {
        self.query(InviteFilter {
            room_id: Some(room_id),
            ..InviteFilter::default()
        })
        .await
    }

    async fn query(&self, filter: InviteFilter) -> Result<Vec<Invite>, ChatError> {
        self.sweep_expired().await?;
        Ok(self.store.find_invites(filter).await?)
    }

    async fn user(&self, user_id: UserId) -> Result<User, ChatError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user {} not found", user_id)))
    }
}
