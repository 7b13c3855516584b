//! Real-time room services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! `registry` tracks live connections, `membership` routes requests to the
//! per-room actors in `room`, `dispatch` fans events out to connection
//! outlets and `presence` forwards typing signals. Route handlers stay
//! focused on protocol translation.

pub mod dispatch;
pub mod membership;
pub mod presence;
pub mod registry;
pub mod room;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::store::StoreError;
use crate::wire::{ErrorCode, ServerEvent};

/// Opaque id of one live WebSocket connection.
pub type ConnectionId = Uuid;

/// Outbound event queue of one connection, drained by its socket task.
pub type Outlet = mpsc::Sender<ServerEvent>;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(Uuid),
    #[error("not a member of room {0}")]
    NotMember(Uuid),
    #[error("room {0} is temporarily unavailable")]
    Unavailable(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NotMember(_) => "E_NOT_MEMBER",
            Self::Unavailable(_) => "E_ROOM_UNAVAILABLE",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Store(e) => e.retryable(),
            Self::NotFound(_) | Self::NotMember(_) => false,
        }
    }
}
