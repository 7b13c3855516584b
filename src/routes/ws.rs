//! WebSocket handler: room event relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers a connection and splits the socket:
//! - Writer task: owns the sink and drains the connection outlet
//! - Reader loop: decodes client events and dispatches them to the
//!   membership manager
//!
//! Handler functions translate protocol into manager calls and return an
//! `Outcome`. Room actors deliver confirmations and broadcasts through the
//! outlet. Errors and `room-info` replies are pushed onto the same outlet, so
//! everything reaches the client in queue order and a handler waiting on one
//! room never holds back events from another.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register session → queue `connected` with `connectionId`
//! 2. Client sends events → dispatch → handler returns Outcome
//! 3. Writer forwards outlet events until the socket or the reader ends
//! 4. Close → implicit leave of the current room → unregister

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::presence;
use crate::services::{ConnectionId, Outlet, RoomError};
use crate::state::AppState;
use crate::wire::{self, ClientEvent, Connected, ServerEvent};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
#[derive(Debug)]
enum Outcome {
    /// The room actor has answered through the outlet, or nothing is owed.
    Applied,
    /// Send this event to the requester only.
    Reply(ServerEvent),
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();

    // Per-connection outlet, fed by room actors and by this reader.
    let (client_tx, client_rx) = mpsc::channel::<ServerEvent>(state.realtime.client_queue_capacity);
    state.registry.register(connection_id).await;

    let welcome = ServerEvent::Connected(Connected { connection_id });
    if client_tx.send(welcome).await.is_ok() {
        info!(%connection_id, "ws: client connected");
    }

    let mut writer = tokio::spawn(write_loop(sink, client_rx));

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, connection_id, &client_tx, text.as_str()).await;
                        if queue_replies(&client_tx, replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    let room_id = state.rooms.handle_disconnect(connection_id).await;
    info!(%connection_id, ?room_id, "ws: client disconnected");
}

/// Forward outlet events to the socket until either side goes away.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut client_rx: mpsc::Receiver<ServerEvent>) {
    while let Some(event) = client_rx.recv().await {
        if send_event(&mut sink, &event).await.is_err() {
            break;
        }
    }
}

/// Direct replies join the outlet behind whatever actors already queued, so a
/// `joined-room` stays ahead of a `room-info` asked after it. Unlike room
/// broadcasts these wait for space instead of being dropped.
async fn queue_replies(client_tx: &Outlet, replies: Vec<ServerEvent>) -> Result<(), ()> {
    for event in replies {
        client_tx.send(event).await.map_err(|_| ())?;
    }
    Ok(())
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Decode and process one inbound text message and return events for the
/// sender.
///
/// This keeps the websocket transport concerns separate from event handling,
/// so tests can drive dispatch without a socket.
async fn process_inbound_text(
    state: &AppState,
    connection_id: ConnectionId,
    client_tx: &Outlet,
    text: &str,
) -> Vec<ServerEvent> {
    let event = match wire::decode(text, state.realtime.max_message_len) {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: rejected inbound event");
            return vec![ServerEvent::error_from(&e, e.event())];
        }
    };

    let name = event.name();
    debug!(%connection_id, event = name, "ws: recv event");

    match dispatch_event(state, connection_id, client_tx, event).await {
        Ok(Outcome::Applied) => vec![],
        Ok(Outcome::Reply(reply)) => vec![reply],
        Err(e) => {
            warn!(%connection_id, event = name, error = %e, "ws: event failed");
            vec![ServerEvent::error_from(&e, Some(name))]
        }
    }
}

async fn dispatch_event(
    state: &AppState,
    connection_id: ConnectionId,
    client_tx: &Outlet,
    event: ClientEvent,
) -> Result<Outcome, RoomError> {
    match event {
        ClientEvent::JoinRoom(join) => {
            let outcome = state
                .rooms
                .join(connection_id, join.user_id, join.room_id, client_tx)
                .await?;
            debug!(%connection_id, room_id = %join.room_id, ?outcome, "ws: join settled");
            Ok(Outcome::Applied)
        }
        ClientEvent::LeaveRoom(leave) => {
            state.rooms.leave(connection_id, leave.room_id).await;
            Ok(Outcome::Applied)
        }
        ClientEvent::SendMessage(msg) => {
            // The author identity comes from the joined session, not the payload.
            let session_user = state
                .registry
                .session(connection_id)
                .await
                .and_then(|s| s.user_id);
            if session_user.is_some_and(|id| id != msg.user_id) {
                debug!(%connection_id, claimed = %msg.user_id, "ws: send-message userId differs from session");
            }
            state
                .rooms
                .send_message(connection_id, msg.room_id, msg.content, client_tx)
                .await?;
            Ok(Outcome::Applied)
        }
        ClientEvent::Typing(typing) => {
            presence::notify_typing(&state.rooms, connection_id, &typing).await;
            Ok(Outcome::Applied)
        }
        ClientEvent::GetRoomInfo(req) => {
            let summary = state.rooms.room_info(req.room_id, req.refresh).await?;
            Ok(Outcome::Reply(ServerEvent::RoomInfo(summary)))
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<(), ()> {
    let json = match event.encode() {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, event = event.name(), "ws: failed to serialize event");
            return Err(());
        }
    };
    if let ServerEvent::Error(err) = event {
        warn!(code = %err.code, message = %err.message, "ws: send event=error");
    } else if !matches!(event, ServerEvent::UserTyping(_)) {
        debug!(event = event.name(), "ws: send event");
    }
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
