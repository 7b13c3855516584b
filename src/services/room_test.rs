use super::*;
use crate::state::AppState;
use crate::state::test_helpers::{self, TestClient, assert_no_event, recv_event};
use tokio::time::{Duration, sleep, timeout};

async fn join(state: &AppState, client: &TestClient, user_id: Uuid, room_id: Uuid) -> JoinOutcome {
    state
        .rooms
        .join(client.id, user_id, room_id, &client.outlet)
        .await
        .expect("join should succeed")
}

async fn send(state: &AppState, client: &TestClient, room_id: Uuid, content: &str) {
    state
        .rooms
        .send_message(client.id, room_id, content.to_string(), &client.outlet)
        .await
        .expect("message should be enqueued");
}

async fn expect_new_message(client: &mut TestClient) -> NewMessage {
    match recv_event(&mut client.rx).await {
        ServerEvent::NewMessage(msg) => msg,
        other => panic!("expected new-message, got {other:?}"),
    }
}

async fn expect_error(client: &mut TestClient) -> wire::ErrorEvent {
    match recv_event(&mut client.rx).await {
        ServerEvent::Error(err) => err,
        other => panic!("expected error, got {other:?}"),
    }
}

async fn wait_until_retired(state: &AppState) {
    timeout(Duration::from_millis(500), async {
        while state.rooms.active_rooms().await > 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("room actor should retire");
}

// =============================================================================
// JOIN
// =============================================================================

#[tokio::test]
async fn join_confirms_requester_and_notifies_others() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("math-101", Some(ada));
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;

    assert_eq!(join(&state, &a, ada, room).await, JoinOutcome::Joined);
    let ServerEvent::JoinedRoom(ack) = recv_event(&mut a.rx).await else {
        panic!("expected joined-room");
    };
    assert_eq!(ack.room_id, room);
    assert_eq!(ack.user_id, ada);
    assert!(ack.message.contains("math-101"));

    join(&state, &b, bea, room).await;
    assert!(matches!(recv_event(&mut b.rx).await, ServerEvent::JoinedRoom(_)));
    let ServerEvent::UserJoined(notice) = recv_event(&mut a.rx).await else {
        panic!("expected user-joined");
    };
    assert_eq!(notice, MemberNotice { user_id: bea, username: "bea".into() });
    assert_no_event(&mut b.rx).await;
}

#[tokio::test]
async fn unknown_user_gets_fallback_display_name() {
    let (state, store) = test_helpers::test_app_state();
    let room = store.add_room("history", None);
    let stranger = Uuid::new_v4();
    let a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    let bea = store.add_user("bea");

    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut b.rx).await;
    join(&state, &a, stranger, room).await;

    let ServerEvent::UserJoined(notice) = recv_event(&mut b.rx).await else {
        panic!("expected user-joined");
    };
    assert_eq!(notice.username, format!("User_{stranger}"));
}

// =============================================================================
// MESSAGES
// =============================================================================

#[tokio::test]
async fn message_reaches_all_members_including_author() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("physics", None);
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut b.rx).await;

    send(&state, &a, room, "hello").await;

    let seen_by_a = expect_new_message(&mut a).await;
    let seen_by_b = expect_new_message(&mut b).await;
    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_b.content, "hello");
    assert_eq!(seen_by_b.room_id, room);
    assert_eq!(seen_by_b.user_id, ada);
    assert_eq!(seen_by_b.user, UserSnippet { id: ada, username: "ada".into() });

    let stored = store.messages_in(room);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, seen_by_b.id);
    assert_eq!(stored[0].created_at_ms, seen_by_b.sent_at);
}

#[tokio::test]
async fn persist_failure_errors_author_and_skips_broadcast() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("chem", None);
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut b.rx).await;

    store.fail_next_creates(1);
    send(&state, &a, room, "lost").await;

    let err = expect_error(&mut a).await;
    assert_eq!(err.code, "E_STORE");
    assert!(err.retryable);
    assert_eq!(err.event.as_deref(), Some("send-message"));
    assert_no_event(&mut b.rx).await;
    assert!(store.messages_in(room).is_empty());

    // The actor survives the failure.
    send(&state, &a, room, "kept").await;
    assert_eq!(expect_new_message(&mut a).await.content, "kept");
    assert_eq!(expect_new_message(&mut b).await.content, "kept");
}

#[tokio::test]
async fn slow_commit_acknowledgement_is_still_delivered() {
    let mut config = test_helpers::test_config();
    config.store_timeout = Duration::from_millis(50);
    let (state, store) = test_helpers::test_app_state_with(config);
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("geology", None);
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut b.rx).await;

    // Committed at once, acknowledged well past the store timeout.
    store.slow_ack(room, Duration::from_millis(200));
    send(&state, &a, room, "durable").await;

    let seen_by_a = expect_new_message(&mut a).await;
    let seen_by_b = expect_new_message(&mut b).await;
    assert_eq!(seen_by_a.content, "durable");
    assert_eq!(seen_by_a.id, seen_by_b.id);
    assert_no_event(&mut a.rx).await;

    let stored = store.messages_in(room);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, seen_by_a.id);
}

#[tokio::test]
async fn message_to_deleted_room_reports_room_not_found() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let room = store.add_room("bio", None);
    let mut a = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    let _ = recv_event(&mut a.rx).await;

    store.delete_room(room);
    send(&state, &a, room, "anyone?").await;

    let err = expect_error(&mut a).await;
    assert_eq!(err.code, "E_ROOM_NOT_FOUND");
    assert_no_event(&mut a.rx).await;
}

#[tokio::test]
async fn message_from_non_member_is_rejected() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let room = store.add_room("art", None);
    let mut a = test_helpers::connect(&state).await;
    let mut outsider = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    let _ = recv_event(&mut a.rx).await;

    send(&state, &outsider, room, "let me in").await;

    let err = expect_error(&mut outsider).await;
    assert_eq!(err.code, "E_NOT_MEMBER");
    assert_no_event(&mut a.rx).await;
    assert!(store.messages_in(room).is_empty());
}

#[tokio::test]
async fn concurrent_senders_are_seen_in_persisted_order() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("ordering", None);
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut b.rx).await;

    let per_sender = 10;
    let mut tasks = Vec::new();
    for (client_id, outlet, tag) in [(a.id, a.outlet.clone(), "a"), (b.id, b.outlet.clone(), "b")] {
        let rooms = state.rooms.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..per_sender {
                rooms
                    .send_message(client_id, room, format!("{tag}-{i}"), &outlet)
                    .await
                    .expect("enqueue should succeed");
            }
        }));
    }
    for task in tasks {
        task.await.expect("sender task should finish");
    }

    let mut seen_by_a = Vec::new();
    let mut seen_by_b = Vec::new();
    for _ in 0..per_sender * 2 {
        seen_by_a.push(expect_new_message(&mut a).await.id);
        seen_by_b.push(expect_new_message(&mut b).await.id);
    }
    let persisted: Vec<Uuid> = store.messages_in(room).iter().map(|m| m.id).collect();

    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_a, persisted);
}

// =============================================================================
// TYPING
// =============================================================================

#[tokio::test]
async fn typing_reaches_everyone_but_the_typist() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("lit", None);
    let mut a = test_helpers::connect(&state).await;
    let mut b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut b.rx).await;

    state.rooms.typing(a.id, room, true).await;

    let ServerEvent::UserTyping(typing) = recv_event(&mut b.rx).await else {
        panic!("expected user-typing");
    };
    assert_eq!(typing, UserTyping { user_id: ada, username: "ada".into(), is_typing: true });
    assert_no_event(&mut a.rx).await;
    assert!(store.messages_in(room).is_empty());
}

// =============================================================================
// INFO
// =============================================================================

#[tokio::test]
async fn info_reports_members_messages_and_creator() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("geo", Some(ada));
    store
        .create_message(room, ada, "before anyone joined")
        .await
        .expect("seed message");
    let mut a = test_helpers::connect(&state).await;
    let b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;

    send(&state, &a, room, "after").await;
    let _ = expect_new_message(&mut a).await;

    let info = state.rooms.room_info(room, false).await.expect("info");
    assert_eq!(info.id, room);
    assert_eq!(info.name, "geo");
    assert_eq!(info.description.as_deref(), Some("geo discussion"));
    assert_eq!(info.creator, Some(UserSnippet { id: ada, username: "ada".into() }));
    assert_eq!(info.member_count, 2);
    assert_eq!(info.message_count, 2);
}

#[tokio::test]
async fn refresh_rereads_message_count_from_store() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let room = store.add_room("music", None);
    let a = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;

    // Written behind the actor's back, e.g. by another service.
    store
        .create_message(room, ada, "out of band")
        .await
        .expect("seed message");

    assert_eq!(state.rooms.room_info(room, false).await.expect("info").message_count, 0);
    assert_eq!(state.rooms.room_info(room, true).await.expect("info").message_count, 1);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn closed_outlet_is_skipped_but_removed_only_on_disconnect() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let bea = store.add_user("bea");
    let room = store.add_room("cs", None);
    let mut a = test_helpers::connect(&state).await;
    let b = test_helpers::connect(&state).await;
    join(&state, &a, ada, room).await;
    join(&state, &b, bea, room).await;
    let _ = recv_event(&mut a.rx).await;
    let _ = recv_event(&mut a.rx).await;

    let b_id = b.id;
    drop(b);

    send(&state, &a, room, "still here?").await;
    assert_eq!(expect_new_message(&mut a).await.content, "still here?");
    assert!(state.rooms.members_of(room).await.contains(&b_id));

    state.rooms.handle_disconnect(b_id).await;
    let ServerEvent::UserLeft(notice) = recv_event(&mut a.rx).await else {
        panic!("expected user-left");
    };
    assert_eq!(notice.user_id, bea);
    assert_eq!(state.rooms.members_of(room).await, vec![a.id]);
}

#[tokio::test]
async fn actor_retires_after_last_leave_and_respawns_on_join() {
    let (state, store) = test_helpers::test_app_state();
    let ada = store.add_user("ada");
    let room = store.add_room("drama", None);
    let mut a = test_helpers::connect(&state).await;

    join(&state, &a, ada, room).await;
    assert_eq!(state.rooms.active_rooms().await, 1);
    assert!(state.rooms.leave(a.id, room).await);
    wait_until_retired(&state).await;

    assert_eq!(join(&state, &a, ada, room).await, JoinOutcome::Joined);
    assert_eq!(state.rooms.active_rooms().await, 1);
    assert_eq!(state.rooms.members_of(room).await, vec![a.id]);

    // joined-room, left-room, joined-room
    assert!(matches!(recv_event(&mut a.rx).await, ServerEvent::JoinedRoom(_)));
    assert!(matches!(recv_event(&mut a.rx).await, ServerEvent::LeftRoom(_)));
    assert!(matches!(recv_event(&mut a.rx).await, ServerEvent::JoinedRoom(_)));
}

#[tokio::test]
async fn retired_actor_settles_every_late_command() {
    let (state, store) = test_helpers::test_app_state();
    let room_id = store.add_room("closing", None);
    let record = store
        .find_room(room_id)
        .await
        .expect("lookup")
        .expect("room exists");
    let actor = RoomActor::new(
        record,
        1,
        ActorDeps {
            store: store.clone(),
            registry: state.registry.clone(),
            table: Arc::new(RwLock::new(HashMap::new())),
            store_timeout: Duration::from_secs(1),
            queue_capacity: 8,
        },
    );
    let mut a = test_helpers::connect(&state).await;

    let (ack, joined) = oneshot::channel();
    let user = display_user(Uuid::new_v4(), None);
    actor.bounce(RoomCommand::Join { connection_id: a.id, user, outlet: a.outlet.clone(), ack });
    assert_eq!(joined.await.expect("join ack"), JoinOutcome::Retired);

    let (ack, left) = oneshot::channel();
    actor.bounce(RoomCommand::Leave { connection_id: a.id, notify: true, ack });
    assert!(!left.await.expect("leave ack"));

    let (reply, info) = oneshot::channel();
    actor.bounce(RoomCommand::Info { refresh: true, reply });
    let summary = info.await.expect("info reply");
    assert_eq!(summary.name, "closing");
    assert_eq!(summary.member_count, 0);

    actor.bounce(RoomCommand::Typing { connection_id: a.id, is_typing: true });
    assert_no_event(&mut a.rx).await;

    actor.bounce(RoomCommand::Message { connection_id: a.id, content: "late".into(), outlet: a.outlet.clone() });
    let err = expect_error(&mut a).await;
    assert_eq!(err.code, "E_NOT_MEMBER");
    assert_eq!(err.event.as_deref(), Some("send-message"));
    assert!(store.messages_in(room_id).is_empty());
    assert!(state.registry.current_room(a.id).await.is_none());
}

#[test]
fn display_user_prefers_store_name() {
    let id = Uuid::new_v4();
    assert_eq!(display_user(id, Some("ada".into())).username, "ada");
    assert_eq!(display_user(id, None).username, format!("User_{id}"));
}
