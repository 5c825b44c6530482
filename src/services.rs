//! Process-wide collaborators
//!
//! Built once at startup and shared by every connection. The managers only
//! see each other through their capability traits.

use std::sync::Arc;

use chrono::Duration;

use crate::auth::{CredentialService, TokenVerifier};
use crate::clock::Clock;
use crate::invites::InviteManager;
use crate::participants::ParticipantManager;
use crate::rooms::RoomManager;
use crate::store::RoomStore;

pub struct Services {
    pub store: Arc<dyn RoomStore>,
    pub tokens: Arc<dyn TokenVerifier>,
    pub rooms: Arc<RoomManager>,
    pub participants: Arc<ParticipantManager>,
    pub invites: Arc<InviteManager>,
}

impl Services {
    pub fn new(
        store: Arc<dyn RoomStore>,
        tokens: Arc<dyn TokenVerifier>,
        credentials: Arc<dyn CredentialService>,
        clock: Arc<dyn Clock>,
        invite_ttl: Duration,
    ) -> Self {
        let rooms = Arc::new(RoomManager::new(store.clone(), credentials, clock.clone()));
        let participants = Arc::new(ParticipantManager::new(
            store.clone(),
            rooms.clone(),
            clock.clone(),
        ));
        let invites = Arc::new(InviteManager::new(
            store.clone(),
            participants.clone(),
            rooms.clone(),
            clock,
            invite_ttl,
        ));

        Self {
            store,
            tokens,
            rooms,
            participants,
            invites,
        }
    }
}
