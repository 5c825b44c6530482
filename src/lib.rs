//! Multi-room WebSocket Chat Core
//!
//! Real-time chat core built with tokio-tungstenite: authenticated
//! connections, per-room permissions and a time-bounded invite workflow.
//!
//! # Features
//! - Bearer-token handshake, re-verified on every action
//! - Public, private, password-protected and direct-message rooms
//! - Owner/operator roles, mute, ban and kick
//! - Invites that expire after a configurable lifetime
//! - Broadcast groups per user, per room, and a lobby feed
//!
//! # Architecture
//! - `ChatServer` is the broadcast hub actor; it owns connections and groups
//! - Each connection runs a `Session` that talks to the hub over `mpsc`
//! - `RoomManager`, `ParticipantManager` and `InviteManager` hold the rules
//!   and depend on each other only through capability traits
//! - Storage, tokens and password hashing sit behind traits
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_core::{handle_connection, ChatServer, Services};
//!
//! #[tokio::main]
//! async fn main() {
//!     let services: Arc<Services> = build_services();
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(cmd_rx).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, services.clone(), cmd_tx.clone()));
//!     }
//! }
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod invites;
pub mod message;
pub mod model;
pub mod participants;
pub mod permissions;
pub mod rooms;
pub mod router;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use auth::{Argon2Credentials, CredentialService, Identity, JwtVerifier, TokenVerifier};
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ServerConfig;
pub use error::{AppError, AuthError, ChatError, SendError, StoreError};
pub use handler::handle_connection;
pub use invites::InviteManager;
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use participants::{BanOutcome, Membership, ParticipantManager};
pub use rooms::{RoomLifecycle, RoomManager};
pub use router::{Session, SessionState};
pub use server::{ChatServer, ServerCommand};
pub use services::Services;
pub use store::{MemoryStore, RoomStore};
pub use types::{ClientId, Group, InviteId, MessageId, ParticipantId, RoomId, UserId};
