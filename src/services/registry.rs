//! Connection registry: bookkeeping for live WebSocket connections.
//!
//! DESIGN
//! ======
//! The registry knows which connections exist and which single room (if any)
//! each one occupies. It holds no room semantics and never broadcasts. Room
//! actors write the room pointer while they process a join or leave, which
//! keeps the pointer and the actor's membership in lockstep.
//!
//! Connect/disconnect callbacks from many sockets mutate the map
//! concurrently, so every access goes through one mutex. The lock is never
//! held across an await on another component.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::ConnectionId;

/// Transient per-connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    /// Client-supplied on first join; not re-verified.
    pub user_id: Option<Uuid>,
    /// Display name cached on first join.
    pub username: Option<String>,
    pub current_room: Option<Uuid>,
    pub connected_at_ms: i64,
}

impl ConnectionSession {
    fn new(connection_id: ConnectionId) -> Self {
        Self { connection_id, user_id: None, username: None, current_room: None, connected_at_ms: now_ms() }
    }

    /// Milliseconds since the connection registered.
    #[must_use]
    pub fn connected_ms(&self) -> i64 {
        (now_ms() - self.connected_at_ms).max(0)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<ConnectionId, ConnectionSession>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with no room. Registering an existing id is a no-op.
    pub async fn register(&self, connection_id: ConnectionId) {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&connection_id) {
            debug!(%connection_id, "registry: connection already registered");
            return;
        }
        sessions.insert(connection_id, ConnectionSession::new(connection_id));
        info!(%connection_id, live = sessions.len(), "registry: connection registered");
    }

    /// Point the session at a room, or at no room. Returns `false` when the
    /// connection is unknown, which happens when a disconnect won the race.
    pub async fn set_room(&self, connection_id: ConnectionId, room_id: Option<Uuid>) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&connection_id) else {
            debug!(%connection_id, ?room_id, "registry: set_room on unknown connection");
            return false;
        };
        session.current_room = room_id;
        true
    }

    /// Clear the room pointer only if it still names `room_id`.
    pub async fn clear_room_if(&self, connection_id: ConnectionId, room_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&connection_id) else {
            debug!(%connection_id, %room_id, "registry: clear_room on unknown connection");
            return false;
        };
        if session.current_room != Some(room_id) {
            return false;
        }
        session.current_room = None;
        true
    }

    /// Cache the display identity used for presence and message events.
    pub async fn set_identity(&self, connection_id: ConnectionId, user_id: Uuid, username: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&connection_id) else {
            debug!(%connection_id, "registry: set_identity on unknown connection");
            return false;
        };
        session.user_id = Some(user_id);
        session.username = Some(username.to_string());
        true
    }

    /// Remove the session and return it, including its last known room.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionSession> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(&connection_id);
        if let Some(s) = &session {
            info!(
                %connection_id,
                live = sessions.len(),
                connected_ms = s.connected_ms(),
                "registry: connection unregistered"
            );
        }
        session
    }

    pub async fn session(&self, connection_id: ConnectionId) -> Option<ConnectionSession> {
        self.sessions.lock().await.get(&connection_id).cloned()
    }

    pub async fn current_room(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.sessions
            .lock()
            .await
            .get(&connection_id)
            .and_then(|s| s.current_room)
    }

    /// Connections whose room pointer names `room_id`.
    #[cfg(test)]
    pub async fn connections_in(&self, room_id: Uuid) -> Vec<ConnectionId> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.current_room == Some(room_id))
            .map(|s| s.connection_id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
