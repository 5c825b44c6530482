//! Multi-room WebSocket Chat Server - Entry Point
//!
//! Loads configuration, wires the services, starts the ChatServer hub and
//! accepts connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_core::{
    handle_connection, Argon2Credentials, ChatServer, JwtVerifier, MemoryStore, ServerConfig,
    Services, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // e.g., RUST_LOG=debug or RUST_LOG=chat_core=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_core=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        "Loaded configuration: {} seed users, invite lifetime {}s",
        config.seed_users.len(),
        config.invite_ttl_secs
    );

    let services = Arc::new(Services::new(
        Arc::new(MemoryStore::with_users(config.seed_users.clone())),
        Arc::new(JwtVerifier::new(&config.jwt_secret)),
        Arc::new(Argon2Credentials),
        Arc::new(SystemClock),
        chrono::Duration::seconds(config.invite_ttl_secs),
    ));

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("WebSocket Chat Server listening on {}", config.bind_addr);

    // Create ChatServer actor channel and start
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_buffer);
    tokio::spawn(ChatServer::new(cmd_rx).run());

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let services = services.clone();
                let cmd_tx = cmd_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, services, cmd_tx).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
