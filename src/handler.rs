//! WebSocket connection handler
//!
//! Handles individual client connections: authenticated WebSocket
//! handshake, then bidirectional communication between the socket and
//! the connection's `Session`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::auth::{bearer_token, Identity, TokenVerifier};
use crate::error::{AppError, AuthError};
use crate::message::ServerMessage;
use crate::router::Session;
use crate::server::ServerCommand;
use crate::services::Services;
use crate::types::ClientId;

/// Outbound buffer per connection
const CLIENT_BUFFER_SIZE: usize = 32;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, rejecting it with 401 unless the
/// `Authorization: Bearer` header verifies, then pumps frames between
/// the socket and a `Session` until either side closes.
pub async fn handle_connection(
    stream: TcpStream,
    services: Arc<Services>,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let mut identity = None;
    let authorize = |request: &Request, response: Response| {
        match authorize_request(services.tokens.as_ref(), request) {
            Ok(resolved) => {
                identity = Some(resolved);
                Ok(response)
            }
            Err(e) => {
                warn!("Rejected handshake from {}: {}", peer_addr, e);
                Err(unauthorized(&e))
            }
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, authorize).await?;
    let Some(identity) = identity else {
        return Ok(());
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Generate client ID
    let client_id = ClientId::new();
    info!(
        "Client {} connected from {} as user {}",
        client_id, peer_addr, identity.user_id
    );

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_BUFFER_SIZE);

    let mut session = Session::new(client_id, services, cmd_tx);
    if let Err(e) = session.open(&identity, msg_tx).await {
        error!("Failed to register client {} - server closed", client_id);
        return Err(e);
    }

    // Write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for client");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Read loop (WebSocket -> Session)
    let read_loop = async {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = session.handle_text(&text).await {
                        debug!("Session for {} ended: {}", client_id, e);
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", client_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read loop ended for {}", client_id);
    };

    // Wait for either side to complete
    tokio::select! {
        _ = read_loop => {}
        _ = &mut write_task => {
            debug!("Write task completed for {}", client_id);
        }
    }

    session.close().await;
    write_task.abort();

    Ok(())
}

/// Resolve the bearer token of a handshake request
fn authorize_request(tokens: &dyn TokenVerifier, request: &Request) -> Result<Identity, AuthError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;
    tokens.verify(token)
}

fn unauthorized(err: &AuthError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("authentication error: {}", err)));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
