//! Session router
//!
//! One `Session` per live connection. It resolves the bearer token carried
//! by every inbound message, runs the action against the managers, and
//! turns the result into hub commands: group joins/leaves for its own
//! connection and a broadcast to the affected groups. Failures go to the
//! acting user's private group only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::Identity;
use crate::error::{AppError, ChatError};
use crate::message::{ClientMessage, InviteInfo, RoomInfo, ServerMessage};
use crate::model::InviteKind;
use crate::participants::{BanOutcome, Membership};
use crate::permissions::{require_not_banned, require_participant};
use crate::rooms::RoomLifecycle;
use crate::server::ServerCommand;
use crate::services::Services;
use crate::types::{ClientId, Group, RoomId, UserId};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authenticated { user_id: UserId },
    Disconnected,
}

/// Hub effects of one successful action, applied in field order
#[derive(Debug, Default)]
struct Outcome {
    /// Leave every group first (re-authentication)
    reset: bool,
    join: Vec<Group>,
    broadcast: Option<(Vec<Group>, ServerMessage)>,
    leave: Vec<Group>,
}

impl Outcome {
    fn broadcast(groups: Vec<Group>, message: ServerMessage) -> Self {
        Self {
            broadcast: Some((groups, message)),
            ..Self::default()
        }
    }

    fn joining(mut self, group: Group) -> Self {
        self.join.push(group);
        self
    }

    fn leaving(mut self, group: Group) -> Self {
        self.leave.push(group);
        self
    }
}

/// Room group, plus the discoverability feed when the room is gone
fn room_audience(room_id: RoomId, room_deleted: bool) -> Vec<Group> {
    if room_deleted {
        vec![Group::Room(room_id), Group::Lobby]
    } else {
        vec![Group::Room(room_id)]
    }
}

pub struct Session {
    client_id: ClientId,
    state: SessionState,
    services: Arc<Services>,
    hub: mpsc::Sender<ServerCommand>,
}

impl Session {
    pub fn new(client_id: ClientId, services: Arc<Services>, hub: mpsc::Sender<ServerCommand>) -> Self {
        Self {
            client_id,
            state: SessionState::Connecting,
            services,
            hub,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn user_id(&self) -> Option<UserId> {
        match self.state {
            SessionState::Authenticated { user_id } => Some(user_id),
            _ => None,
        }
    }

    /// Register with the hub and join the groups of an identity resolved
    /// at handshake
    pub async fn open(
        &mut self,
        identity: &Identity,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), AppError> {
        self.send_hub(ServerCommand::Connect {
            client_id: self.client_id,
            sender,
        })
        .await?;
        self.state = SessionState::Authenticating;

        self.send_hub(ServerCommand::SendTo {
            client_id: self.client_id,
            message: ServerMessage::Connected {
                client_id: self.client_id.to_string(),
                user_id: identity.user_id,
            },
        })
        .await?;

        match self.authenticate(identity).await {
            Ok(outcome) => self.apply(outcome).await?,
            Err(e) => {
                // Still reachable for the error report
                let outcome = Outcome::default()
                    .joining(Group::User(identity.user_id))
                    .joining(Group::Lobby);
                self.apply(outcome).await?;
                self.report(Some(identity.user_id), e).await?;
            }
        }
        self.state = SessionState::Authenticated {
            user_id: identity.user_id,
        };
        info!(
            "Client {} authenticated as user {} ({})",
            self.client_id, identity.user_id, identity.username
        );
        Ok(())
    }

    /// Parse and handle one inbound text frame
    pub async fn handle_text(&mut self, text: &str) -> Result<(), AppError> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                warn!("Invalid JSON from {}: {}", self.client_id, e);
                self.send_hub(ServerCommand::SendTo {
                    client_id: self.client_id,
                    message: ServerMessage::invalid_message(&e),
                })
                .await
            }
        }
    }

    pub async fn handle(&mut self, msg: ClientMessage) -> Result<(), AppError> {
        let Some(bound) = self.user_id() else {
            debug!("Dropping {} from client {} in state {:?}", msg.kind(), self.client_id, self.state);
            return Ok(());
        };
        let kind = msg.kind();

        let identity = match self.services.tokens.verify(msg.token()) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("{} from client {} rejected: {}", kind, self.client_id, e);
                return self.report(Some(bound), e.into()).await;
            }
        };

        let is_login = matches!(msg, ClientMessage::Login { .. });
        if !is_login && identity.user_id != bound {
            warn!(
                "{} from client {} carries a token for user {}, bound to user {}",
                kind, self.client_id, identity.user_id, bound
            );
            let err = ChatError::Authentication(format!(
                "token is for user {}, connection is bound to user {}; log in first",
                identity.user_id, bound
            ));
            return self.report(None, err).await;
        }
        match self.dispatch(&identity, msg).await {
            Ok(outcome) => {
                debug!("{} by user {} accepted", kind, identity.user_id);
                self.apply(outcome).await?;
                if is_login {
                    self.state = SessionState::Authenticated {
                        user_id: identity.user_id,
                    };
                }
                Ok(())
            }
            Err(e) => {
                match &e {
                    ChatError::Store(_) | ChatError::Credential(_) => {
                        error!("{} by user {} failed: {}", kind, identity.user_id, e)
                    }
                    _ => warn!("{} by user {} rejected: {}", kind, identity.user_id, e),
                }
                self.report(Some(identity.user_id), e).await
            }
        }
    }

    /// Unregister from the hub; further messages are ignored
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let _ = self
            .hub
            .send(ServerCommand::Disconnect {
                client_id: self.client_id,
            })
            .await;
        match self.user_id() {
            Some(user_id) => info!("Client {} (user {}) disconnected", self.client_id, user_id),
            None => info!("Client {} disconnected", self.client_id),
        }
        self.state = SessionState::Disconnected;
    }

    /// Groups for a fresh identity: its own, the feed, and every room it
    /// is a non-banned participant of
    async fn authenticate(&self, identity: &Identity) -> Result<Outcome, ChatError> {
        let rooms = self
            .services
            .participants
            .rooms_for_user(identity.user_id)
            .await?;

        let mut outcome = Outcome {
            reset: true,
            ..Outcome::default()
        }
        .joining(Group::User(identity.user_id))
        .joining(Group::Lobby);
        for room in rooms {
            outcome = outcome.joining(Group::Room(room.id));
        }
        Ok(outcome)
    }

    async fn dispatch(&self, me: &Identity, msg: ClientMessage) -> Result<Outcome, ChatError> {
        let services = &self.services;
        let user_id = me.user_id;
        let username = me.username.clone();

        let outcome = match msg {
            ClientMessage::Login { .. } => {
                let mut outcome = self.authenticate(me).await?;
                outcome.broadcast = Some((
                    vec![Group::User(user_id)],
                    ServerMessage::Login { user_id, username },
                ));
                outcome
            }
            ClientMessage::AddRoom {
                name,
                password,
                is_private,
                ..
            } => {
                let room = services
                    .rooms
                    .create_room(user_id, &name, password.as_deref(), is_private)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Lobby],
                    ServerMessage::AddRoom {
                        room: RoomInfo::from(&room),
                        owner_id: user_id,
                        owner_username: username,
                    },
                )
                .joining(Group::Room(room.id))
            }
            ClientMessage::JoinRoom {
                room_id, password, ..
            } => {
                let (room, _) = services.participants.join(user_id, room_id, &password).await?;
                Outcome::broadcast(
                    vec![Group::Room(room.id)],
                    ServerMessage::JoinRoom {
                        room: RoomInfo::from(&room),
                        user_id,
                        username,
                    },
                )
                .joining(Group::Room(room.id))
            }
            ClientMessage::LeaveRoom { room_id, .. } => {
                let room_deleted = services.participants.leave(user_id, room_id).await?;
                Outcome::broadcast(
                    room_audience(room_id, room_deleted),
                    ServerMessage::LeaveRoom {
                        room_id,
                        user_id,
                        username,
                        room_deleted,
                    },
                )
                .leaving(Group::Room(room_id))
            }
            ClientMessage::DirectMessage { target_id, .. } => {
                let dm = services
                    .rooms
                    .create_direct_message_room(user_id, target_id)
                    .await?;
                let [_, target] = &dm.users;
                Outcome::broadcast(
                    vec![Group::User(user_id), Group::User(target_id)],
                    ServerMessage::DirectMessage {
                        room: RoomInfo::from(&dm.room),
                        user_id,
                        username,
                        target_id,
                        target_username: target.username.clone(),
                    },
                )
                .joining(Group::Room(dm.room.id))
            }
            ClientMessage::DeleteRoom { room_id, .. } => {
                services.rooms.delete_room_as(user_id, room_id).await?;
                Outcome::broadcast(
                    room_audience(room_id, true),
                    ServerMessage::DeleteRoom { room_id, user_id },
                )
                .leaving(Group::Room(room_id))
            }
            ClientMessage::ChatMessage {
                room_id, content, ..
            } => {
                let message = services
                    .participants
                    .send_message(user_id, room_id, content)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Room(room_id)],
                    ServerMessage::ChatMessage {
                        id: message.id,
                        room_id,
                        user_id,
                        username,
                        content: message.content,
                        sent_at: message.sent_at,
                    },
                )
            }
            ClientMessage::Mute {
                room_id,
                target_id,
                minutes,
                ..
            } => {
                let muted_until = services
                    .participants
                    .mute(user_id, target_id, room_id, minutes)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Room(room_id)],
                    ServerMessage::Mute {
                        room_id,
                        user_id,
                        target_id,
                        username,
                        muted_until,
                    },
                )
            }
            ClientMessage::ToggleOperator {
                room_id, target_id, ..
            } => {
                let target = services
                    .participants
                    .toggle_operator(user_id, target_id, room_id)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Room(room_id)],
                    ServerMessage::ToggleOperator {
                        room_id,
                        user_id,
                        target_id,
                        username,
                        is_operator: target.is_operator(),
                    },
                )
            }
            ClientMessage::Ban {
                room_id, target_id, ..
            } => {
                let (is_banned, room_deleted) =
                    match services.participants.ban(user_id, target_id, room_id).await? {
                        BanOutcome::Banned(_) => (true, false),
                        BanOutcome::Unbanned { room_deleted } => (false, room_deleted),
                    };
                Outcome::broadcast(
                    room_audience(room_id, room_deleted),
                    ServerMessage::Ban {
                        room_id,
                        user_id,
                        target_id,
                        username,
                        is_banned,
                        room_deleted,
                    },
                )
            }
            ClientMessage::Kick {
                room_id, target_id, ..
            } => {
                let room_deleted = services
                    .participants
                    .kick(user_id, target_id, room_id)
                    .await?;
                Outcome::broadcast(
                    room_audience(room_id, room_deleted),
                    ServerMessage::Kick {
                        room_id,
                        user_id,
                        target_id,
                        username,
                        room_deleted,
                    },
                )
            }
            ClientMessage::TogglePrivate { room_id, .. } => {
                let room = services.rooms.toggle_private(user_id, room_id).await?;
                Outcome::broadcast(
                    vec![Group::Lobby],
                    ServerMessage::TogglePrivate {
                        room: RoomInfo::from(&room),
                        user_id,
                    },
                )
            }
            ClientMessage::SetPassword {
                room_id, password, ..
            } => {
                let room = services
                    .rooms
                    .set_password(user_id, room_id, &password)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Lobby],
                    ServerMessage::SetPassword {
                        room: RoomInfo::from(&room),
                        user_id,
                    },
                )
            }
            ClientMessage::Invite {
                room_id, target_id, ..
            } => {
                let invite = services
                    .invites
                    .create_invite(InviteKind::Chat, user_id, target_id, room_id)
                    .await?;
                let invited = services
                    .store
                    .find_user(target_id)
                    .await?
                    .ok_or_else(|| ChatError::NotFound(format!("user {} not found", target_id)))?;
                let room = services.rooms.room(room_id).await?;
                Outcome::broadcast(
                    vec![Group::User(user_id), Group::User(target_id)],
                    ServerMessage::Invite {
                        invite: InviteInfo::new(&invite, username, invited.username, &room),
                    },
                )
            }
            ClientMessage::AcceptInvite {
                room_id, password, ..
            } => {
                let (room, _) = services
                    .invites
                    .accept_invite(user_id, room_id, &password)
                    .await?;
                Outcome::broadcast(
                    vec![Group::Room(room.id)],
                    ServerMessage::AcceptInvite {
                        room: RoomInfo::from(&room),
                        user_id,
                        username,
                    },
                )
                .joining(Group::Room(room.id))
            }
            ClientMessage::RefuseInvite { invite_id, .. } => {
                let invite = services.invites.fetch_invite(invite_id).await?;
                if invite.invited_id != user_id {
                    return Err(ChatError::PermissionDenied(format!(
                        "invite {} is not addressed to user {}",
                        invite_id, user_id
                    )));
                }
                services.invites.refuse_invite(invite_id).await?;
                Outcome::broadcast(
                    vec![Group::User(user_id), Group::User(invite.sender_id)],
                    ServerMessage::RefuseInvite { invite_id, user_id },
                )
            }
            ClientMessage::JoinSocketRoom { room_id, .. } => {
                let participant = services
                    .participants
                    .find_participant(user_id, room_id)
                    .await?;
                let participant = require_participant(participant, user_id, room_id)?;
                require_not_banned(&participant)?;
                Outcome::default().joining(Group::Room(room_id))
            }
            ClientMessage::LeaveSocketRoom { room_id, .. } => {
                match services
                    .participants
                    .find_participant(user_id, room_id)
                    .await?
                {
                    Some(p) if !p.is_banned() => {
                        debug!("User {} is still in room {}, keeping group", user_id, room_id);
                        Outcome::default()
                    }
                    _ => Outcome::default().leaving(Group::Room(room_id)),
                }
            }
        };
        Ok(outcome)
    }

    async fn apply(&self, outcome: Outcome) -> Result<(), AppError> {
        let client_id = self.client_id;
        if outcome.reset {
            self.send_hub(ServerCommand::LeaveAllGroups { client_id }).await?;
        }
        for group in outcome.join {
            self.send_hub(ServerCommand::JoinGroup { client_id, group }).await?;
        }
        if let Some((groups, message)) = outcome.broadcast {
            self.send_hub(ServerCommand::Broadcast { groups, message }).await?;
        }
        for group in outcome.leave {
            self.send_hub(ServerCommand::LeaveGroup { client_id, group }).await?;
        }
        Ok(())
    }

    /// Error to the user's private group, or to this connection alone
    /// while no user is bound
    async fn report(&self, user_id: Option<UserId>, err: ChatError) -> Result<(), AppError> {
        let message = ServerMessage::from(err);
        let cmd = match user_id {
            Some(user_id) => ServerCommand::Broadcast {
                groups: vec![Group::User(user_id)],
                message,
            },
            None => ServerCommand::SendTo {
                client_id: self.client_id,
                message,
            },
        };
        self.send_hub(cmd).await
    }

    async fn send_hub(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.hub.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::auth::{Argon2Credentials, TokenVerifier};
    use crate::clock::ManualClock;
    use crate::error::AuthError;
    use crate::message::ErrorCode;
    use crate::model::User;
    use crate::server::ChatServer;
    use crate::store::MemoryStore;

    /// Token "alice" is user 1, "bob" user 2, "carol" user 3
    struct StaticTokens(HashMap<String, Identity>);

    impl TokenVerifier for StaticTokens {
        fn verify(&self, token: &str) -> Result<Identity, AuthError> {
            if token.is_empty() {
                return Err(AuthError::MissingToken);
            }
            self.0.get(token).cloned().ok_or(AuthError::InvalidToken)
        }
    }

    struct Harness {
        services: Arc<Services>,
        hub: mpsc::Sender<ServerCommand>,
        clock: Arc<ManualClock>,
    }

    struct Conn {
        session: Session,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let names = ["alice", "bob", "carol"];
            let users: Vec<User> = names
                .iter()
                .enumerate()
                .map(|(i, name)| User {
                    id: UserId(i as i64 + 1),
                    username: name.to_string(),
                })
                .collect();
            let tokens = users
                .iter()
                .map(|u| {
                    (
                        u.username.clone(),
                        Identity {
                            user_id: u.id,
                            username: u.username.clone(),
                        },
                    )
                })
                .collect();

            let clock = Arc::new(ManualClock::default());
            let services = Arc::new(Services::new(
                Arc::new(MemoryStore::with_users(users)),
                Arc::new(StaticTokens(tokens)),
                Arc::new(Argon2Credentials),
                clock.clone(),
                Duration::seconds(3600),
            ));

            let (hub, hub_rx) = mpsc::channel(256);
            tokio::spawn(ChatServer::new(hub_rx).run());
            Self {
                services,
                hub,
                clock,
            }
        }

        async fn connect(&self, token: &str) -> Conn {
            let identity = self.services.tokens.verify(token).unwrap();
            let (tx, mut rx) = mpsc::channel(64);
            let mut session = Session::new(ClientId::new(), self.services.clone(), self.hub.clone());
            session.open(&identity, tx).await.unwrap();
            assert!(matches!(rx.recv().await, Some(ServerMessage::Connected { .. })));
            Conn { session, rx }
        }
    }

    impl Conn {
        async fn send(&mut self, value: serde_json::Value) {
            self.session.handle_text(&value.to_string()).await.unwrap();
        }

        /// Everything delivered to this connection so far
        async fn drain(&mut self) -> Vec<ServerMessage> {
            let marker = ServerMessage::Connected {
                client_id: "marker".into(),
                user_id: UserId(0),
            };
            self.session
                .hub
                .send(ServerCommand::SendTo {
                    client_id: self.session.client_id,
                    message: marker.clone(),
                })
                .await
                .unwrap();

            let mut received = Vec::new();
            while let Some(msg) = self.rx.recv().await {
                if msg == marker {
                    break;
                }
                received.push(msg);
            }
            received
        }
    }

    fn error_code(messages: &[ServerMessage]) -> Option<ErrorCode> {
        messages.iter().find_map(|m| match m {
            ServerMessage::Error { code, .. } => Some(*code),
            _ => None,
        })
    }

    async fn general(alice: &mut Conn) -> RoomId {
        alice
            .send(json!({"type": "add-room", "token": "alice", "name": "general"}))
            .await;
        alice
            .drain()
            .await
            .iter()
            .find_map(|m| match m {
                ServerMessage::AddRoom { room, .. } => Some(room.id),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_authenticates() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        assert_eq!(
            alice.session.state(),
            SessionState::Authenticated { user_id: UserId(1) }
        );
        alice.session.close().await;
        assert_eq!(alice.session.state(), SessionState::Disconnected);

        alice
            .session
            .handle_text(r#"{"type": "login", "token": "alice"}"#)
            .await
            .unwrap();
        assert!(alice.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_add_room_reaches_every_connection() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;

        let room_id = general(&mut alice).await;
        let seen = bob.drain().await;
        assert!(matches!(
            &seen[..],
            [ServerMessage::AddRoom { room, owner_id: UserId(1), .. }] if room.id == room_id
        ));
    }

    #[tokio::test]
    async fn test_chat_is_scoped_to_room_group() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let mut carol = h.connect("carol").await;
        let room_id = general(&mut alice).await;

        bob.send(json!({"type": "join-room", "token": "bob", "room_id": room_id}))
            .await;
        bob.send(json!({"type": "chat-message", "token": "bob", "room_id": room_id, "content": "hi"}))
            .await;

        let to_alice = alice.drain().await;
        assert!(matches!(to_alice[0], ServerMessage::JoinRoom { user_id: UserId(2), .. }));
        assert!(matches!(
            &to_alice[1],
            ServerMessage::ChatMessage { content, user_id: UserId(2), .. } if content == "hi"
        ));
        assert_eq!(bob.drain().await.len(), 3);

        let to_carol = carol.drain().await;
        assert!(to_carol
            .iter()
            .all(|m| matches!(m, ServerMessage::AddRoom { .. })));
    }

    #[tokio::test]
    async fn test_errors_go_to_acting_user_only() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.drain().await;

        bob.send(json!({"type": "delete-room", "token": "bob", "room_id": room_id}))
            .await;
        assert_eq!(error_code(&bob.drain().await), Some(ErrorCode::NotFound));
        assert!(alice.drain().await.is_empty());

        bob.send(json!({"type": "join-room", "token": "bob", "room_id": room_id}))
            .await;
        bob.send(json!({"type": "delete-room", "token": "bob", "room_id": room_id}))
            .await;
        assert_eq!(
            error_code(&bob.drain().await),
            Some(ErrorCode::PermissionDenied)
        );
        assert!(alice
            .drain()
            .await
            .iter()
            .all(|m| !matches!(m, ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_every_action_rechecks_the_token() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;

        alice
            .send(json!({"type": "add-room", "token": "revoked", "name": "general"}))
            .await;
        assert_eq!(
            error_code(&alice.drain().await),
            Some(ErrorCode::AuthenticationError)
        );
        assert!(h
            .services
            .rooms
            .find_room(RoomId(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_foreign_token_needs_login_first() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.drain().await;

        // bob's connection, alice's token
        bob.send(json!({"type": "add-room", "token": "alice", "name": "side"}))
            .await;
        bob.send(json!({"type": "join-socket-room", "token": "alice", "room_id": room_id}))
            .await;
        let to_bob = bob.drain().await;
        assert_eq!(to_bob.len(), 2);
        assert!(to_bob.iter().all(|m| matches!(
            m,
            ServerMessage::Error { code: ErrorCode::AuthenticationError, .. }
        )));
        assert_eq!(h.services.rooms.public_rooms().await.unwrap().len(), 1);
        assert!(alice.drain().await.is_empty());

        // not following alice's room
        alice
            .send(json!({"type": "chat-message", "token": "alice", "room_id": room_id, "content": "hi"}))
            .await;
        assert!(bob.drain().await.is_empty());

        // an explicit login rebinds the connection
        bob.send(json!({"type": "login", "token": "alice"})).await;
        assert_eq!(
            bob.session.state(),
            SessionState::Authenticated { user_id: UserId(1) }
        );
        bob.send(json!({"type": "add-room", "token": "alice", "name": "side"}))
            .await;
        assert!(bob
            .drain()
            .await
            .iter()
            .any(|m| matches!(m, ServerMessage::AddRoom { owner_id: UserId(1), .. })));
    }

    #[tokio::test]
    async fn test_lobby_sees_room_settings_and_deletion() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut carol = h.connect("carol").await;
        let room_id = general(&mut alice).await;
        carol.drain().await;

        alice
            .send(json!({"type": "toggle-private", "token": "alice", "room_id": room_id}))
            .await;
        alice
            .send(json!({"type": "set-password", "token": "alice", "room_id": room_id, "password": "sesame"}))
            .await;
        alice
            .send(json!({"type": "delete-room", "token": "alice", "room_id": room_id}))
            .await;

        let to_carol = carol.drain().await;
        assert_eq!(to_carol.len(), 3);
        assert!(matches!(
            &to_carol[0],
            ServerMessage::TogglePrivate { room, user_id: UserId(1) } if room.id == room_id && room.is_private
        ));
        assert!(matches!(
            &to_carol[1],
            ServerMessage::SetPassword { room, user_id: UserId(1) } if room.id == room_id && room.has_password
        ));
        assert!(matches!(
            to_carol[2],
            ServerMessage::DeleteRoom { room_id: deleted, user_id: UserId(1) } if deleted == room_id
        ));
        assert!(to_carol
            .iter()
            .all(|m| !matches!(m, ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_invalid_frame() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        alice.session.handle_text("{not json").await.unwrap();
        assert_eq!(
            error_code(&alice.drain().await),
            Some(ErrorCode::InvalidMessage)
        );
    }

    #[tokio::test]
    async fn test_direct_message_then_follow_room() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let mut carol = h.connect("carol").await;

        alice
            .send(json!({"type": "direct-message", "token": "alice", "target_id": 2}))
            .await;
        let to_bob = bob.drain().await;
        let room_id = match &to_bob[..] {
            [ServerMessage::DirectMessage {
                room,
                target_username,
                ..
            }] => {
                assert_eq!(room.name, "DM: alice bob");
                assert_eq!(target_username, "bob");
                room.id
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(alice.drain().await.len(), 1);
        assert!(carol.drain().await.is_empty());

        bob.send(json!({"type": "join-socket-room", "token": "bob", "room_id": room_id}))
            .await;
        alice
            .send(json!({"type": "chat-message", "token": "alice", "room_id": room_id, "content": "psst"}))
            .await;
        assert!(matches!(bob.drain().await[..], [ServerMessage::ChatMessage { .. }]));

        carol
            .send(json!({"type": "join-socket-room", "token": "carol", "room_id": room_id}))
            .await;
        assert_eq!(error_code(&carol.drain().await), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_kicked_user_stops_following_room() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.send(json!({"type": "join-room", "token": "bob", "room_id": room_id}))
            .await;
        bob.drain().await;

        alice
            .send(json!({"type": "kick", "token": "alice", "room_id": room_id, "target_id": 2}))
            .await;
        assert!(matches!(
            bob.drain().await[..],
            [ServerMessage::Kick { target_id: UserId(2), room_deleted: false, .. }]
        ));

        bob.send(json!({"type": "leave-socket-room", "token": "bob", "room_id": room_id}))
            .await;
        alice
            .send(json!({"type": "chat-message", "token": "alice", "room_id": room_id, "content": "bye"}))
            .await;
        assert!(bob.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_login_rebuilds_room_groups() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.drain().await;

        // Joined through another path; this connection does not follow yet
        h.services
            .participants
            .join(UserId(2), room_id, "")
            .await
            .unwrap();
        alice
            .send(json!({"type": "chat-message", "token": "alice", "room_id": room_id, "content": "one"}))
            .await;
        assert!(bob.drain().await.is_empty());

        bob.send(json!({"type": "login", "token": "bob"})).await;
        bob.send(json!({"type": "login", "token": "bob"})).await;
        alice
            .send(json!({"type": "chat-message", "token": "alice", "room_id": room_id, "content": "two"}))
            .await;

        let to_bob = bob.drain().await;
        assert!(matches!(to_bob[0], ServerMessage::Login { user_id: UserId(2), .. }));
        assert!(matches!(to_bob[1], ServerMessage::Login { .. }));
        assert!(matches!(&to_bob[2], ServerMessage::ChatMessage { content, .. } if content == "two"));
        assert_eq!(to_bob.len(), 3);
    }

    #[tokio::test]
    async fn test_muted_user_cannot_chat() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.send(json!({"type": "join-room", "token": "bob", "room_id": room_id}))
            .await;
        alice
            .send(json!({"type": "mute", "token": "alice", "room_id": room_id, "target_id": 2, "minutes": 5}))
            .await;
        bob.drain().await;

        bob.send(json!({"type": "chat-message", "token": "bob", "room_id": room_id, "content": "hey"}))
            .await;
        assert_eq!(
            error_code(&bob.drain().await),
            Some(ErrorCode::PermissionDenied)
        );

        h.clock.advance(Duration::minutes(5));
        bob.send(json!({"type": "chat-message", "token": "bob", "room_id": room_id, "content": "hey"}))
            .await;
        assert!(matches!(bob.drain().await[..], [ServerMessage::ChatMessage { .. }]));
    }

    #[tokio::test]
    async fn test_invite_accept_and_refuse() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let mut carol = h.connect("carol").await;
        let room_id = general(&mut alice).await;
        bob.drain().await;
        carol.drain().await;

        alice
            .send(json!({"type": "invite", "token": "alice", "room_id": room_id, "target_id": 2}))
            .await;
        match &bob.drain().await[..] {
            [ServerMessage::Invite { invite }] => {
                assert_eq!(invite.sender_username, "alice");
                assert_eq!(invite.invited_username, "bob");
                assert_eq!(invite.room.id, room_id);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(carol.drain().await.is_empty());

        bob.send(json!({"type": "accept-invite", "token": "bob", "room_id": room_id}))
            .await;
        assert!(matches!(
            bob.drain().await[..],
            [ServerMessage::AcceptInvite { user_id: UserId(2), .. }]
        ));

        alice
            .send(json!({"type": "invite", "token": "alice", "room_id": room_id, "target_id": 3}))
            .await;
        let invite_id = match &carol.drain().await[..] {
            [ServerMessage::Invite { invite }] => invite.id,
            other => panic!("unexpected {:?}", other),
        };
        alice.drain().await;

        bob.send(json!({"type": "refuse-invite", "token": "bob", "invite_id": invite_id}))
            .await;
        assert_eq!(
            error_code(&bob.drain().await),
            Some(ErrorCode::PermissionDenied)
        );

        carol
            .send(json!({"type": "refuse-invite", "token": "carol", "invite_id": invite_id}))
            .await;
        assert!(matches!(
            alice.drain().await[..],
            [ServerMessage::RefuseInvite { user_id: UserId(3), .. }]
        ));
    }

    #[tokio::test]
    async fn test_owner_leaving_deletes_room_for_everyone() {
        let h = Harness::new();
        let mut alice = h.connect("alice").await;
        let mut bob = h.connect("bob").await;
        let room_id = general(&mut alice).await;
        bob.send(json!({"type": "join-room", "token": "bob", "room_id": room_id}))
            .await;
        bob.drain().await;

        alice
            .send(json!({"type": "leave-room", "token": "alice", "room_id": room_id}))
            .await;
        let to_bob = bob.drain().await;
        assert!(matches!(
            to_bob[..],
            [ServerMessage::LeaveRoom { room_deleted: true, .. }]
        ));
        assert!(h
            .services
            .participants
            .rooms_for_user(UserId(2))
            .await
            .unwrap()
            .is_empty());
    }
}
