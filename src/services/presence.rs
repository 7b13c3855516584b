//! Presence/typing notifier.
//!
//! Stateless pass-through from a decoded `typing` event to the owning room
//! actor. Typing signals are never persisted.

use tracing::debug;

use super::ConnectionId;
use super::membership::MembershipManager;
use crate::wire::Typing;

/// Forward a typing signal. Returns `false` when the signal was dropped
/// because the connection does not occupy the named room.
pub async fn notify_typing(manager: &MembershipManager, connection_id: ConnectionId, typing: &Typing) -> bool {
    let current = manager.registry().current_room(connection_id).await;
    if current != Some(typing.room_id) {
        debug!(%connection_id, room_id = %typing.room_id, ?current, "presence: typing outside current room dropped");
        return false;
    }
    manager
        .typing(connection_id, typing.room_id, typing.is_typing)
        .await;
    true
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
