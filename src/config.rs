//! Server configuration
//!
//! Read once at startup from `CHAT_*` environment variables. The bind
//! address may also be given as the first command line argument.

use std::env;

use thiserror::Error;

use crate::model::User;
use crate::types::UserId;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default invite lifetime (one hour)
pub const DEFAULT_INVITE_TTL_SECS: i64 = 60 * 60;

/// Default capacity of the hub command channel
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Startup configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub invite_ttl_secs: i64,
    pub channel_buffer: usize,
    /// Users preloaded into the in-memory store
    pub seed_users: Vec<User>,
}

impl ServerConfig {
    /// Load configuration from the process environment and arguments
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok(), env::args().nth(1))
    }

    fn from_lookup<F>(lookup: F, addr_arg: Option<String>) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let bind_addr = addr_arg
            .or_else(|| lookup("CHAT_BIND_ADDR"))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let jwt_secret = lookup("CHAT_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("CHAT_JWT_SECRET"))?;

        let invite_ttl_secs = parse_or("CHAT_INVITE_TTL_SECS", &lookup, DEFAULT_INVITE_TTL_SECS)?;
        if invite_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "CHAT_INVITE_TTL_SECS",
                value: invite_ttl_secs.to_string(),
            });
        }

        let channel_buffer = parse_or("CHAT_CHANNEL_BUFFER", &lookup, DEFAULT_CHANNEL_BUFFER)?;
        if channel_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "CHAT_CHANNEL_BUFFER",
                value: "0".to_string(),
            });
        }

        let seed_users = match lookup("CHAT_SEED_USERS") {
            Some(raw) => parse_seed_users(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            invite_ttl_secs,
            channel_buffer,
            seed_users,
        })
    }
}

fn parse_or<F, T>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Parse `id:name,id:name`
fn parse_seed_users(raw: &str) -> Result<Vec<User>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::Invalid {
                name: "CHAT_SEED_USERS",
                value: entry.to_string(),
            };
            let (id, username) = entry.split_once(':').ok_or_else(invalid)?;
            let id = id.trim().parse().map_err(|_| invalid())?;
            let username = username.trim();
            if username.is_empty() {
                return Err(invalid());
            }
            Ok(User {
                id: UserId(id),
                username: username.to_string(),
            })
        })
        .collect()
}
