//! Room membership manager: entry point for room requests.
//!
//! DESIGN
//! ======
//! The manager validates rooms against the store, resolves the room actor
//! for a request and forwards the request to it. Actors are created lazily
//! on the first join and retire themselves when their last member leaves,
//! so memory follows the number of active rooms, not the number of rooms.
//!
//! The room table lock is held only to look up, insert or retire a handle.
//! Nothing awaits an actor while holding it.
//!
//! TRADE-OFFS
//! ==========
//! A join can race with the retirement of the actor it was routed to. The
//! actor then bounces the join and the manager retries against a fresh
//! actor. Retries are bounded; a room that keeps bouncing is reported as
//! unavailable rather than looping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use super::room::{self, ActorDeps, JoinOutcome, RoomCommand, RoomHandle, RoomTable, display_user};
use super::{ConnectionId, Outlet, RoomError};
use crate::config::RealtimeConfig;
use crate::store::{Room, RoomStore, StoreError};
use crate::wire::RoomSummary;

const MAX_JOIN_ATTEMPTS: usize = 3;

pub struct MembershipManager {
    store: Arc<dyn RoomStore>,
    registry: Arc<ConnectionRegistry>,
    rooms: RoomTable,
    config: RealtimeConfig,
    next_generation: AtomicU64,
}

impl MembershipManager {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, registry: Arc<ConnectionRegistry>, config: RealtimeConfig) -> Self {
        Self {
            store,
            registry,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            config,
            next_generation: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    // =========================================================================
    // JOIN / LEAVE / DISCONNECT
    // =========================================================================

    /// Admit a connection to a room. On success the actor has already sent
    /// `joined-room` to the requester and `user-joined` to the other members.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotFound`] for a missing or deleted room,
    /// [`RoomError::Store`] if the lookup fails, and
    /// [`RoomError::Unavailable`] if the room actor kept retiring.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        room_id: Uuid,
        outlet: &Outlet,
    ) -> Result<JoinOutcome, RoomError> {
        let Some(room) = self.store_call(self.store.find_room(room_id)).await? else {
            return Err(RoomError::NotFound(room_id));
        };

        // One room per connection: leave the previous one first.
        if let Some(previous) = self.registry.current_room(connection_id).await {
            if previous != room_id {
                self.leave(connection_id, previous).await;
            }
        }

        let user = display_user(user_id, self.resolve_username(connection_id, user_id).await);
        self.registry
            .set_identity(connection_id, user_id, &user.username)
            .await;

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let handle = self.get_or_create(&room).await;
            let (ack, ack_rx) = oneshot::channel();
            let cmd = RoomCommand::Join { connection_id, user: user.clone(), outlet: outlet.clone(), ack };

            let outcome = if handle.send(cmd).await.is_ok() {
                ack_rx.await.unwrap_or(JoinOutcome::Retired)
            } else {
                JoinOutcome::Retired
            };

            if outcome != JoinOutcome::Retired {
                return Ok(outcome);
            }
            debug!(%room_id, %connection_id, attempt, "membership: join bounced by retiring actor");
            self.forget(&handle).await;
        }

        warn!(%room_id, %connection_id, "membership: join gave up after repeated retirements");
        Err(RoomError::Unavailable(room_id))
    }

    /// Remove a connection from a room. Returns whether it was a member;
    /// leaving a room one is not in is a no-op.
    pub async fn leave(&self, connection_id: ConnectionId, room_id: Uuid) -> bool {
        let removed = self.send_leave(connection_id, room_id, true).await;
        if !removed {
            // Keep the pointer honest even when no actor knew the connection.
            self.registry.clear_room_if(connection_id, room_id).await;
        }
        removed
    }

    /// Disconnect path: drop the session and run an implicit leave for its
    /// room without messaging the departed connection. Returns that room.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let session = self.registry.unregister(connection_id).await?;
        let room_id = session.current_room?;
        let removed = self.send_leave(connection_id, room_id, false).await;
        info!(%connection_id, %room_id, removed, "membership: disconnect cleanup");
        Some(room_id)
    }

    async fn send_leave(&self, connection_id: ConnectionId, room_id: Uuid, notify: bool) -> bool {
        let Some(handle) = self.get(room_id).await else {
            return false;
        };
        let (ack, ack_rx) = oneshot::channel();
        if handle
            .send(RoomCommand::Leave { connection_id, notify, ack })
            .await
            .is_err()
        {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    // =========================================================================
    // MESSAGES / TYPING / INFO
    // =========================================================================

    /// Enqueue a message for the room actor. Persistence and broadcast
    /// happen on the actor; failures there reach the author as `error`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotMember`] when the room has no live actor.
    pub async fn send_message(
        &self,
        connection_id: ConnectionId,
        room_id: Uuid,
        content: String,
        outlet: &Outlet,
    ) -> Result<(), RoomError> {
        let Some(handle) = self.get(room_id).await else {
            return Err(RoomError::NotMember(room_id));
        };
        handle
            .send(RoomCommand::Message { connection_id, content, outlet: outlet.clone() })
            .await
            .map_err(|_| RoomError::NotMember(room_id))
    }

    /// Forward a typing signal. Dropped silently when the room is inactive.
    pub async fn typing(&self, connection_id: ConnectionId, room_id: Uuid, is_typing: bool) {
        let Some(handle) = self.get(room_id).await else {
            debug!(%room_id, %connection_id, "membership: typing for inactive room dropped");
            return;
        };
        let _ = handle
            .send(RoomCommand::Typing { connection_id, is_typing })
            .await;
    }

    /// Room summary from the live actor, or from the store with no members.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotFound`] or [`RoomError::Store`] when the room
    /// is inactive and the store cannot describe it.
    pub async fn room_info(&self, room_id: Uuid, refresh: bool) -> Result<RoomSummary, RoomError> {
        if let Some(handle) = self.get(room_id).await {
            let (reply, reply_rx) = oneshot::channel();
            if handle
                .send(RoomCommand::Info { refresh, reply })
                .await
                .is_ok()
            {
                if let Ok(summary) = reply_rx.await {
                    return Ok(summary);
                }
            }
        }
        self.offline_summary(room_id).await
    }

    async fn offline_summary(&self, room_id: Uuid) -> Result<RoomSummary, RoomError> {
        let Some(room) = self.store_call(self.store.find_room(room_id)).await? else {
            return Err(RoomError::NotFound(room_id));
        };
        let message_count = self.store_call(self.store.count_messages(room_id)).await?;
        let creator = match room.created_by {
            Some(creator_id) => {
                let name = self
                    .store_call(self.store.find_user(creator_id))
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.username);
                Some(display_user(creator_id, name))
            }
            None => None,
        };
        Ok(RoomSummary {
            id: room.id,
            name: room.name,
            description: room.description,
            creator,
            member_count: 0,
            message_count,
        })
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Connections the room actor currently counts as members.
    #[cfg(test)]
    pub async fn members_of(&self, room_id: Uuid) -> Vec<ConnectionId> {
        let Some(handle) = self.get(room_id).await else {
            return Vec::new();
        };
        let (reply, reply_rx) = oneshot::channel();
        if handle.send(RoomCommand::Members { reply }).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn active_rooms(&self) -> usize {
        self.rooms.read().await.len()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn get(&self, room_id: Uuid) -> Option<RoomHandle> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    async fn get_or_create(&self, room: &Room) -> RoomHandle {
        if let Some(handle) = self.get(room.id).await {
            return handle;
        }

        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(&room.id) {
            return handle.clone();
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = room::spawn(room.clone(), generation, self.actor_deps());
        rooms.insert(room.id, handle.clone());
        info!(room_id = %room.id, generation, active = rooms.len(), "membership: room actor spawned");
        handle
    }

    fn actor_deps(&self) -> ActorDeps {
        ActorDeps {
            store: self.store.clone(),
            registry: self.registry.clone(),
            table: self.rooms.clone(),
            store_timeout: self.config.store_timeout,
            queue_capacity: self.config.room_queue_capacity,
        }
    }

    /// Drop a handle whose actor has closed, unless it was already replaced.
    async fn forget(&self, handle: &RoomHandle) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(&handle.room_id)
            .is_some_and(|h| h.generation == handle.generation)
        {
            rooms.remove(&handle.room_id);
        }
    }

    async fn resolve_username(&self, connection_id: ConnectionId, user_id: Uuid) -> Option<String> {
        if let Some(session) = self.registry.session(connection_id).await {
            if session.user_id == Some(user_id) && session.username.is_some() {
                return session.username;
            }
        }
        match self.store_call(self.store.find_user(user_id)).await {
            Ok(user) => user.map(|u| u.username),
            Err(e) => {
                warn!(%user_id, error = %e, "membership: user lookup failed, using fallback name");
                None
            }
        }
    }

    async fn store_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout.as_millis())),
        }
    }
}

#[cfg(test)]
#[path = "membership_test.rs"]
mod tests;
