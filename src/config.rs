//! Server configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Only `DATABASE_URL` is required. Every tuning knob has a default and an
//! unparseable value silently falls back to it, so a typo in an optional
//! variable never prevents startup.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ROOM_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;
pub const MIN_STORE_TIMEOUT_MS: u64 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Tuning knobs for the real-time room subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Bounded command queue per room actor.
    pub room_queue_capacity: usize,
    /// Bounded outbound event queue per connection.
    pub client_queue_capacity: usize,
    /// Upper bound on store lookups, and the server-side statement timeout
    /// applied to every pooled connection.
    pub store_timeout: Duration,
    /// Maximum `send-message` content length, in characters.
    pub max_message_len: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            room_queue_capacity: DEFAULT_ROOM_QUEUE_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub realtime: RealtimeConfig,
}

impl Config {
    /// Build typed config from the process environment.
    ///
    /// Required:
    /// - `DATABASE_URL`
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `ROOM_QUEUE_CAPACITY`: default 256
    /// - `CLIENT_QUEUE_CAPACITY`: default 256
    /// - `STORE_TIMEOUT_MS`: default 10000
    /// - `MAX_MESSAGE_LEN`: default 4000
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. `from_env` delegates here.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let store_timeout_ms = parse_or(lookup("STORE_TIMEOUT_MS"), DEFAULT_STORE_TIMEOUT_MS).max(MIN_STORE_TIMEOUT_MS);

        Ok(Self {
            database_url,
            port: parse_or(lookup("PORT"), DEFAULT_PORT),
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            realtime: RealtimeConfig {
                room_queue_capacity: parse_or(lookup("ROOM_QUEUE_CAPACITY"), DEFAULT_ROOM_QUEUE_CAPACITY).max(1),
                client_queue_capacity: parse_or(lookup("CLIENT_QUEUE_CAPACITY"), DEFAULT_CLIENT_QUEUE_CAPACITY).max(1),
                store_timeout: Duration::from_millis(store_timeout_ms),
                max_message_len: parse_or(lookup("MAX_MESSAGE_LEN"), DEFAULT_MAX_MESSAGE_LEN),
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
