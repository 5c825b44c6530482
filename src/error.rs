//! Error types for the chat core
//!
//! Defines fatal connection errors, action-level errors, and the errors of
//! the external store and auth boundaries. Uses thiserror for ergonomic
//! error definitions.

use thiserror::Error;

/// Fatal, per-connection errors
///
/// Any of these ends the connection handler.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Action-level errors
///
/// Reported to the acting user's private group only; never retried.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad, missing or expired bearer token
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Referenced user, room, participant or invite is missing
    #[error("not found: {0}")]
    NotFound(String),

    /// An authorization check failed
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Duplicate room name, already a participant, invite target already joined
    #[error("conflict: {0}")]
    Conflict(String),

    /// Password hashing failed
    #[error("credential error: {0}")]
    Credential(String),

    /// The store rejected or failed a call
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AuthError> for ChatError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Hashing(msg) => ChatError::Credential(msg),
            other => ChatError::Authentication(other.to_string()),
        }
    }
}

/// Errors surfaced by a `RoomStore`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Update or delete targeted a record that does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// A unique constraint was violated
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The backend could not serve the call
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Token and credential errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token was presented
    #[error("missing token")]
    MissingToken,

    /// Token failed signature or claim validation
    #[error("invalid token")]
    InvalidToken,

    /// Token is past its expiry
    #[error("token expired")]
    TokenExpired,

    /// Password hashing or token signing failed
    #[error("hashing error: {0}")]
    Hashing(String),
}

/// Message send errors
///
/// Occurs when a connection's outbound channel cannot take a message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection is not draining its outbound buffer
    #[error("Channel full")]
    ChannelFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_maps_to_authentication() {
        let err: ChatError = AuthError::TokenExpired.into();
        assert!(matches!(err, ChatError::Authentication(_)));

        let err: ChatError = AuthError::Hashing("boom".into()).into();
        assert!(matches!(err, ChatError::Credential(_)));
    }

    #[test]
    fn test_store_error_wraps() {
        let err: ChatError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.to_string(), "store error: store unavailable: down");
    }
}
