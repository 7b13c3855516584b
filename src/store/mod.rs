//! Persistence gateway consumed by the real-time room subsystem.
//!
//! ARCHITECTURE
//! ============
//! Room actors never touch SQL. They see the durable store only through the
//! `RoomStore` trait: room and user lookups plus message creation. The
//! production implementation is `PgStore`; tests substitute an in-memory mock.
//!
//! ERROR HANDLING
//! ==============
//! `NotFound` covers every "target does not exist" case, including rows that
//! are soft-deleted and foreign-key violations on insert. Everything else is
//! a transient `Database` failure that the caller reports to the requester.

pub mod postgres;

use serde::Serialize;
use uuid::Uuid;

use crate::wire::ErrorCode;

pub use postgres::PgStore;

// =============================================================================
// TYPES
// =============================================================================

/// A persisted discussion space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// A durably stored chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    /// Milliseconds since Unix epoch, assigned by the store.
    pub created_at_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("store call timed out after {0}ms")]
    Timeout(u128),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Timeout(_) => "E_STORE_TIMEOUT",
            Self::Database(_) => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Database(_))
    }
}

// =============================================================================
// GATEWAY TRAIT
// =============================================================================

/// Durable room/user/message operations. Enables mocking in tests.
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync {
    /// Look up a live (not soft-deleted) room.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup itself fails.
    async fn find_room(&self, room_id: Uuid) -> Result<Option<Room>, StoreError>;

    /// Look up a user for display purposes.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup itself fails.
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Durably create a message. Returns only after the write is acknowledged.
    ///
    /// Implementations bound the call themselves. Callers must not cancel it:
    /// an abandoned write may commit without anyone observing it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the room is missing or deleted or
    /// the user is unknown, and [`StoreError::Database`] when the write did
    /// not happen.
    async fn create_message(&self, room_id: Uuid, user_id: Uuid, content: &str) -> Result<Message, StoreError>;

    /// Count non-deleted messages in a room.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    async fn count_messages(&self, room_id: Uuid) -> Result<i64, StoreError>;
}
