//! Room actor: the single serialization point for one active room.
//!
//! ARCHITECTURE
//! ============
//! One tokio task per active room drains one bounded command queue. Every
//! join, leave, message, typing signal and info query for the room passes
//! through that queue, so the room observes one total order of events and
//! its member set is touched by exactly one task. Different rooms share
//! nothing on this path and run fully in parallel.
//!
//! LIFECYCLE
//! =========
//! 1. Spawned by the membership manager on the first join of a room.
//! 2. Loads display metadata (creator, message count) before the first command.
//! 3. Processes commands in arrival order.
//! 4. When the member set becomes empty, retires under the room table lock:
//!    removes its handle, closes its queue, bounces anything still queued.
//!
//! ERROR HANDLING
//! ==============
//! A failed store call fails only the command that made it. The author gets
//! an `error` event, nothing is broadcast, and the actor keeps serving.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatch::{self, Delivery};
use super::registry::ConnectionRegistry;
use super::{ConnectionId, Outlet, RoomError};
use crate::store::{Room, RoomStore, StoreError};
use crate::wire::{self, MemberNotice, NewMessage, RoomAck, RoomSummary, ServerEvent, UserSnippet, UserTyping};

/// Live room handles keyed by room id. Shared by the manager and its actors.
pub type RoomTable = Arc<RwLock<HashMap<Uuid, RoomHandle>>>;

// =============================================================================
// COMMANDS
// =============================================================================

/// How a join was settled by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The connection was already a member; only `joined-room` was resent.
    AlreadyMember,
    /// The connection disconnected before the join was applied.
    ConnectionGone,
    /// The actor was retiring; retry against a fresh actor.
    Retired,
}

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection_id: ConnectionId,
        user: UserSnippet,
        outlet: Outlet,
        ack: oneshot::Sender<JoinOutcome>,
    },
    Leave {
        connection_id: ConnectionId,
        /// `false` on the disconnect path: the departed socket gets nothing.
        notify: bool,
        ack: oneshot::Sender<bool>,
    },
    Message {
        connection_id: ConnectionId,
        content: String,
        /// Requester outlet, used for errors when the sender is not a member.
        outlet: Outlet,
    },
    Typing {
        connection_id: ConnectionId,
        is_typing: bool,
    },
    Info {
        refresh: bool,
        reply: oneshot::Sender<RoomSummary>,
    },
    #[cfg(test)]
    Members {
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable address of a running room actor.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub room_id: Uuid,
    /// Distinguishes successive actors for the same room.
    pub generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Enqueue a command. Fails, handing the command back, once the actor has
    /// closed its queue.
    pub async fn send(&self, cmd: RoomCommand) -> Result<(), RoomCommand> {
        self.tx.send(cmd).await.map_err(|e| e.0)
    }
}

/// Everything an actor needs besides its room.
#[derive(Clone)]
pub struct ActorDeps {
    pub store: Arc<dyn RoomStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub table: RoomTable,
    pub store_timeout: Duration,
    pub queue_capacity: usize,
}

/// Spawn an actor for `room`. The caller inserts the handle into the table.
pub fn spawn(room: Room, generation: u64, deps: ActorDeps) -> RoomHandle {
    let (tx, rx) = mpsc::channel(deps.queue_capacity);
    let handle = RoomHandle { room_id: room.id, generation, tx };
    let actor = RoomActor::new(room, generation, deps);
    tokio::spawn(actor.run(rx));
    handle
}

// =============================================================================
// ACTOR
// =============================================================================

struct Member {
    user: UserSnippet,
    outlet: Outlet,
}

struct RoomActor {
    room: Room,
    generation: u64,
    creator: Option<UserSnippet>,
    message_count: i64,
    members: HashMap<ConnectionId, Member>,
    /// Members whose outlet reported closed. Skipped by broadcasts until the
    /// disconnect path removes them.
    stale: HashSet<ConnectionId>,
    deps: ActorDeps,
}

impl RoomActor {
    fn new(room: Room, generation: u64, deps: ActorDeps) -> Self {
        Self {
            room,
            generation,
            creator: None,
            message_count: 0,
            members: HashMap::new(),
            stale: HashSet::new(),
            deps,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        let room_id = self.room.id;
        info!(%room_id, generation = self.generation, "room actor started");
        self.load_metadata().await;

        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
            if self.members.is_empty() && self.try_retire(&mut rx).await {
                break;
            }
        }

        // Commands that raced with retirement are still buffered.
        while let Ok(cmd) = rx.try_recv() {
            self.bounce(cmd);
        }
        info!(%room_id, generation = self.generation, "room actor retired");
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { connection_id, user, outlet, ack } => {
                let outcome = self.apply_join(connection_id, user, outlet).await;
                let _ = ack.send(outcome);
            }
            RoomCommand::Leave { connection_id, notify, ack } => {
                let removed = self.apply_leave(connection_id, notify).await;
                let _ = ack.send(removed);
            }
            RoomCommand::Message { connection_id, content, outlet } => {
                self.apply_message(connection_id, content, &outlet).await;
            }
            RoomCommand::Typing { connection_id, is_typing } => {
                self.apply_typing(connection_id, is_typing);
            }
            RoomCommand::Info { refresh, reply } => {
                let summary = self.get_info(refresh).await;
                let _ = reply.send(summary);
            }
            #[cfg(test)]
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.members.keys().copied().collect());
            }
        }
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    async fn apply_join(&mut self, connection_id: ConnectionId, user: UserSnippet, outlet: Outlet) -> JoinOutcome {
        let room_id = self.room.id;

        if let Some(member) = self.members.get_mut(&connection_id) {
            member.outlet = outlet;
            self.stale.remove(&connection_id);
            let ack = self.room_ack(user.id, "Already in room");
            self.reply(connection_id, ServerEvent::JoinedRoom(ack));
            return JoinOutcome::AlreadyMember;
        }

        // Registry first: if the connection is already gone, admitting it
        // would leave a member that no disconnect will ever remove.
        if !self.deps.registry.set_room(connection_id, Some(room_id)).await {
            debug!(%room_id, %connection_id, "room: join from departed connection ignored");
            return JoinOutcome::ConnectionGone;
        }

        let notice = MemberNotice { user_id: user.id, username: user.username.clone() };
        let ack = self.room_ack(user.id, "Joined room");
        self.members.insert(connection_id, Member { user, outlet });
        self.stale.remove(&connection_id);
        info!(%room_id, %connection_id, members = self.members.len(), "room: member joined");

        self.reply(connection_id, ServerEvent::JoinedRoom(ack));
        self.broadcast(&ServerEvent::UserJoined(notice), Some(connection_id));
        JoinOutcome::Joined
    }

    async fn apply_leave(&mut self, connection_id: ConnectionId, notify: bool) -> bool {
        let room_id = self.room.id;
        let Some(member) = self.members.remove(&connection_id) else {
            debug!(%room_id, %connection_id, "room: leave from non-member is a no-op");
            return false;
        };
        self.stale.remove(&connection_id);
        self.deps.registry.clear_room_if(connection_id, room_id).await;
        info!(%room_id, %connection_id, members = self.members.len(), "room: member left");

        if notify {
            let ack = self.room_ack(member.user.id, "Left room");
            dispatch::send_one(connection_id, &member.outlet, ServerEvent::LeftRoom(ack));
        }
        let notice = MemberNotice { user_id: member.user.id, username: member.user.username };
        self.broadcast(&ServerEvent::UserLeft(notice), None);
        true
    }

    // =========================================================================
    // MESSAGES & PRESENCE
    // =========================================================================

    async fn apply_message(&mut self, connection_id: ConnectionId, content: String, outlet: &Outlet) {
        let room_id = self.room.id;
        let Some(author) = self.members.get(&connection_id).map(|m| m.user.clone()) else {
            let err = RoomError::NotMember(room_id);
            dispatch::send_one(connection_id, outlet, ServerEvent::error_from(&err, Some(wire::EVENT_SEND_MESSAGE)));
            return;
        };

        // The room waits here, other rooms do not. No client-side timeout: a
        // cancelled write may still commit, so the store bounds it server-side.
        let created = self
            .deps
            .store
            .create_message(room_id, author.id, &content)
            .await;

        let message = match created {
            Ok(message) => message,
            Err(e) => {
                warn!(%room_id, %connection_id, error = %e, "room: message persist failed");
                let err = match e {
                    StoreError::NotFound("room") => RoomError::NotFound(room_id),
                    other => RoomError::Store(other),
                };
                dispatch::send_one(connection_id, outlet, ServerEvent::error_from(&err, Some(wire::EVENT_SEND_MESSAGE)));
                return;
            }
        };

        self.message_count += 1;
        debug!(%room_id, message_id = %message.id, "room: message persisted");
        let event = ServerEvent::NewMessage(NewMessage {
            id: message.id,
            room_id,
            user_id: message.user_id,
            content: message.content,
            user: author,
            sent_at: message.created_at_ms,
        });
        self.broadcast(&event, None);
    }

    fn apply_typing(&mut self, connection_id: ConnectionId, is_typing: bool) {
        let Some(member) = self.members.get(&connection_id) else {
            debug!(room_id = %self.room.id, %connection_id, "room: typing from non-member ignored");
            return;
        };
        let event = ServerEvent::UserTyping(UserTyping {
            user_id: member.user.id,
            username: member.user.username.clone(),
            is_typing,
        });
        self.broadcast(&event, Some(connection_id));
    }

    // =========================================================================
    // INFO
    // =========================================================================

    async fn load_metadata(&mut self) {
        let room_id = self.room.id;
        self.creator = match self.room.created_by {
            Some(creator_id) => match self.with_timeout(self.deps.store.find_user(creator_id)).await {
                Ok(user) => Some(display_user(creator_id, user.map(|u| u.username))),
                Err(e) => {
                    warn!(%room_id, error = %e, "room: creator lookup failed");
                    Some(display_user(creator_id, None))
                }
            },
            None => None,
        };
        match self.with_timeout(self.deps.store.count_messages(room_id)).await {
            Ok(count) => self.message_count = count,
            Err(e) => warn!(%room_id, error = %e, "room: message count failed"),
        }
    }

    async fn get_info(&mut self, refresh: bool) -> RoomSummary {
        if refresh {
            match self.with_timeout(self.deps.store.count_messages(self.room.id)).await {
                Ok(count) => self.message_count = count,
                Err(e) => warn!(room_id = %self.room.id, error = %e, "room: refresh count failed, using cached"),
            }
        }
        RoomSummary {
            id: self.room.id,
            name: self.room.name.clone(),
            description: self.room.description.clone(),
            creator: self.creator.clone(),
            member_count: self.members.len(),
            message_count: self.message_count,
        }
    }

    // =========================================================================
    // RETIREMENT
    // =========================================================================

    /// Retire if nothing is queued. Holding the table write lock means no new
    /// handle can be handed out while the queue is checked and closed.
    async fn try_retire(&self, rx: &mut mpsc::Receiver<RoomCommand>) -> bool {
        let mut table = self.deps.table.write().await;
        if !rx.is_empty() {
            return false;
        }
        if table
            .get(&self.room.id)
            .is_some_and(|h| h.generation == self.generation)
        {
            table.remove(&self.room.id);
        }
        rx.close();
        true
    }

    /// Settle a command that reached a retired actor. The room is empty, so
    /// nobody sending here can be a member.
    fn bounce(&self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { ack, .. } => {
                let _ = ack.send(JoinOutcome::Retired);
            }
            RoomCommand::Leave { ack, .. } => {
                let _ = ack.send(false);
            }
            RoomCommand::Message { connection_id, outlet, .. } => {
                let err = RoomError::NotMember(self.room.id);
                dispatch::send_one(connection_id, &outlet, ServerEvent::error_from(&err, Some(wire::EVENT_SEND_MESSAGE)));
            }
            RoomCommand::Typing { .. } => {}
            RoomCommand::Info { reply, .. } => {
                let _ = reply.send(RoomSummary {
                    id: self.room.id,
                    name: self.room.name.clone(),
                    description: self.room.description.clone(),
                    creator: self.creator.clone(),
                    member_count: 0,
                    message_count: self.message_count,
                });
            }
            #[cfg(test)]
            RoomCommand::Members { reply } => {
                let _ = reply.send(Vec::new());
            }
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn room_ack(&self, user_id: Uuid, verb: &str) -> RoomAck {
        RoomAck { room_id: self.room.id, user_id, message: format!("{verb} {}", self.room.name) }
    }

    fn reply(&mut self, connection_id: ConnectionId, event: ServerEvent) {
        let Some(member) = self.members.get(&connection_id) else {
            return;
        };
        if dispatch::send_one(connection_id, &member.outlet, event) == Delivery::Disconnected {
            self.stale.insert(connection_id);
        }
    }

    /// Deliver to every live member, optionally excluding one.
    fn broadcast(&mut self, event: &ServerEvent, exclude: Option<ConnectionId>) {
        let targets = self
            .members
            .iter()
            .filter(|(id, _)| exclude != Some(**id) && !self.stale.contains(*id))
            .map(|(id, member)| (*id, &member.outlet));
        let report = dispatch::send(targets, event);

        if !report.dropped.is_empty() {
            warn!(
                room_id = %self.room.id,
                event = event.name(),
                delivered = report.delivered,
                dropped = report.dropped.len(),
                "room: slow members missed an event"
            );
        }
        if !report.disconnected.is_empty() {
            debug!(room_id = %self.room.id, count = report.disconnected.len(), "room: members likely disconnected");
            self.stale.extend(report.disconnected);
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.deps.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.deps.store_timeout.as_millis())),
        }
    }
}

/// Display name for a user, falling back to `User_<id>` when the store has
/// no record of them.
#[must_use]
pub fn display_user(user_id: Uuid, username: Option<String>) -> UserSnippet {
    UserSnippet { id: user_id, username: username.unwrap_or_else(|| format!("User_{user_id}")) }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
