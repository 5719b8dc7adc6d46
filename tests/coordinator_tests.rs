#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for `PresenceCoordinator`.
//!
//! A loopback transport lets each test decide exactly when the server's
//! `connect`, `authenticated` and presence frames arrive relative to the
//! caller's `join_room`/`leave_room` calls.

mod common;

use serde_json::json;
use speaking_presence::protocol::{
    Frame, EVENT_JOIN_ROOM, EVENT_LEAVE_ROOM, EVENT_ROOM_USERS_UPDATE,
};
use speaking_presence::{PresenceConfig, PresenceCoordinator, PresenceError, PresenceEvent};
use tokio::sync::mpsc;

use common::{
    join_payload, loopback_pair, next_event, user, wait_for, LoopbackServer, EXPECT_TIMEOUT,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start() -> (
    PresenceCoordinator,
    mpsc::Receiver<PresenceEvent>,
    LoopbackServer,
) {
    start_with(PresenceConfig::new())
}

fn start_with(
    config: PresenceConfig,
) -> (
    PresenceCoordinator,
    mpsc::Receiver<PresenceEvent>,
    LoopbackServer,
) {
    let (transport, server) = loopback_pair();
    let (coordinator, events) = PresenceCoordinator::start(transport, config);
    (coordinator, events, server)
}

async fn connected(server: &LoopbackServer, events: &mut mpsc::Receiver<PresenceEvent>) {
    server.connect();
    wait_for(events, &PresenceEvent::Connected).await;
}

async fn authenticated(server: &LoopbackServer, events: &mut mpsc::Receiver<PresenceEvent>) {
    connected(server, events).await;
    server.authenticate();
    wait_for(events, &PresenceEvent::Authenticated).await;
}

fn assert_join(frame: &Frame, topic: &str, exam_id: &str) {
    assert_eq!(frame.event, EVENT_JOIN_ROOM);
    assert_eq!(frame.data, Some(join_payload(topic, exam_id)));
}

// ════════════════════════════════════════════════════════════════════
// Authentication gate
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_between_connect_and_authenticated_is_sent_exactly_once() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Environment", "exam-42");
    server.assert_nothing_sent().await;
    assert!(coordinator.is_connected());
    assert!(!coordinator.is_authenticated());

    server.authenticate();
    assert_join(&server.next_sent().await, "Environment", "exam-42");
    server.assert_nothing_sent().await;
    assert!(coordinator.is_authenticated());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn join_after_authenticated_is_immediate() {
    let (mut coordinator, mut events, mut server) = start();
    authenticated(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    assert_join(&server.next_sent().await, "Travel", "exam-7");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn join_before_connect_waits_for_first_session() {
    let (mut coordinator, mut events, mut server) = start();

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    connected(&server, &mut events).await;
    server.assert_nothing_sent().await;

    server.authenticate();
    assert_join(&server.next_sent().await, "Travel", "exam-7");
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn connect_over_live_connection_discards_pending_join() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    connected(&server, &mut events).await;
    server.authenticate();
    wait_for(&mut events, &PresenceEvent::Authenticated).await;
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn only_the_last_queued_join_is_sent() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Environment", "exam-42");
    coordinator.join_room("Travel", "exam-7");
    coordinator.join_room("Food", "exam-9");
    server.assert_nothing_sent().await;

    server.authenticate();
    assert_join(&server.next_sent().await, "Food", "exam-9");
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn reconnect_requires_fresh_authentication() {
    let (mut coordinator, mut events, mut server) = start();
    authenticated(&server, &mut events).await;
    assert!(coordinator.is_authenticated());

    connected(&server, &mut events).await;
    assert!(!coordinator.is_authenticated());

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    server.authenticate();
    assert_join(&server.next_sent().await, "Travel", "exam-7");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn reconnect_discards_join_queued_on_previous_session() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    server.disconnect();
    wait_for(&mut events, &PresenceEvent::Disconnected).await;
    assert!(!coordinator.is_connected());

    connected(&server, &mut events).await;
    server.authenticate();
    wait_for(&mut events, &PresenceEvent::Authenticated).await;
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn duplicate_authenticated_does_not_resend() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;
    server.authenticate();
    assert_join(&server.next_sent().await, "Travel", "exam-7");

    server.authenticate();
    wait_for(&mut events, &PresenceEvent::Authenticated).await;
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Leave and emit
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn leave_is_sent_without_authentication() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.leave_room("Travel");
    let frame = server.next_sent().await;
    assert_eq!(frame.event, EVENT_LEAVE_ROOM);
    assert_eq!(frame.data, Some(json!({ "topic": "Travel" })));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn leave_cancels_pending_join_for_same_topic() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    coordinator.leave_room("Travel");
    assert_eq!(server.next_sent().await.event, EVENT_LEAVE_ROOM);

    server.authenticate();
    wait_for(&mut events, &PresenceEvent::Authenticated).await;
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn leave_and_join_are_independent_when_cancel_is_disabled() {
    let config = PresenceConfig::new().with_cancel_pending_join_on_leave(false);
    let (mut coordinator, mut events, mut server) = start_with(config);
    connected(&server, &mut events).await;

    coordinator.join_room("Travel", "exam-7");
    coordinator.leave_room("Travel");
    assert_eq!(server.next_sent().await.event, EVENT_LEAVE_ROOM);

    server.authenticate();
    assert_join(&server.next_sent().await, "Travel", "exam-7");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn emit_sends_custom_event_immediately() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    coordinator.emit("raise_hand", Some(json!({ "topic": "Travel" })));
    let frame = server.next_sent().await;
    assert_eq!(frame.event, "raise_hand");
    assert_eq!(frame.data, Some(json!({ "topic": "Travel" })));

    coordinator.emit("ping", None);
    assert_eq!(server.next_sent().await, Frame::bare("ping"));
    assert!(coordinator.current_online_users().is_empty());

    coordinator.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Presence snapshot
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn presence_updates_replace_the_snapshot() {
    let (mut coordinator, mut events, server) = start();
    authenticated(&server, &mut events).await;

    let a = user("u1", "Ana");
    let b = user("u2", "Ben");

    server.room_users(&[a.clone(), b.clone()]);
    wait_for(
        &mut events,
        &PresenceEvent::RoomUsersUpdated {
            users: vec![a.clone(), b.clone()],
        },
    )
    .await;
    assert_eq!(coordinator.current_online_users(), vec![a.clone(), b]);

    server.room_users(&[a.clone()]);
    wait_for(
        &mut events,
        &PresenceEvent::RoomUsersUpdated {
            users: vec![a.clone()],
        },
    )
    .await;
    assert_eq!(coordinator.current_online_users(), vec![a]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn online_users_receiver_observes_replacements() {
    let (mut coordinator, mut events, server) = start();
    connected(&server, &mut events).await;

    let mut online = coordinator.online_users();
    assert!(online.borrow_and_update().is_empty());

    server.room_users(&[user("u2", "Ben"), user("u1", "Ana")]);
    tokio::time::timeout(EXPECT_TIMEOUT, online.changed())
        .await
        .expect("no presence change")
        .expect("store dropped");
    let ids: Vec<_> = online.borrow_and_update().iter().map(|u| u.id.clone()).collect();
    assert_eq!(ids, ["u2", "u1"]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn update_without_users_keeps_previous_snapshot() {
    let (mut coordinator, mut events, server) = start();
    connected(&server, &mut events).await;

    let a = user("u1", "Ana");
    server.room_users(&[a.clone()]);
    wait_for(
        &mut events,
        &PresenceEvent::RoomUsersUpdated {
            users: vec![a.clone()],
        },
    )
    .await;

    server.push(Frame::new(EVENT_ROOM_USERS_UPDATE, Some(json!({ "room": "Travel" }))));
    server.push(Frame::bare(EVENT_ROOM_USERS_UPDATE));
    server.push(Frame::new("marker", None));
    wait_for(
        &mut events,
        &PresenceEvent::Message {
            event: "marker".into(),
            data: None,
        },
    )
    .await;

    assert_eq!(coordinator.current_online_users(), vec![a]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn disconnect_clears_the_snapshot() {
    let (mut coordinator, mut events, server) = start();
    connected(&server, &mut events).await;

    server.room_users(&[user("u1", "Ana")]);
    server.disconnect();
    wait_for(&mut events, &PresenceEvent::Disconnected).await;

    assert!(coordinator.current_online_users().is_empty());

    coordinator.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle and teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_empties_snapshot_and_discards_pending_join() {
    let (mut coordinator, mut events, mut server) = start();
    connected(&server, &mut events).await;

    server.room_users(&[user("u1", "Ana")]);
    wait_for(
        &mut events,
        &PresenceEvent::RoomUsersUpdated {
            users: vec![user("u1", "Ana")],
        },
    )
    .await;
    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;

    assert!(coordinator.current_online_users().is_empty());
    assert!(coordinator.online_users().borrow().is_empty());
    assert!(!coordinator.is_connected());
    assert!(!coordinator.is_authenticated());
    server.assert_nothing_sent().await;
    assert_eq!(
        next_event(&mut events).await,
        PresenceEvent::Closed {
            reason: Some("coordinator shut down".into())
        }
    );
}

#[tokio::test]
async fn dropping_the_coordinator_empties_the_snapshot() {
    let (coordinator, mut events, server) = start();
    connected(&server, &mut events).await;

    server.room_users(&[user("u1", "Ana")]);
    wait_for(
        &mut events,
        &PresenceEvent::RoomUsersUpdated {
            users: vec![user("u1", "Ana")],
        },
    )
    .await;

    let online = coordinator.online_users();
    drop(coordinator);
    assert!(online.borrow().is_empty());
}

#[tokio::test]
async fn connect_error_is_reported_and_loop_keeps_running() {
    let (mut coordinator, mut events, mut server) = start();

    server.connect_error("xhr poll error");
    assert_eq!(
        next_event(&mut events).await,
        PresenceEvent::ConnectError {
            message: "xhr poll error".into()
        }
    );
    assert!(!coordinator.is_connected());

    // A later successful connect still works.
    connected(&server, &mut events).await;
    coordinator.leave_room("Travel");
    assert_eq!(server.next_sent().await.event, EVENT_LEAVE_ROOM);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let (mut coordinator, mut events, server) = start();

    server.push_raw("{\"no_event\":true}");
    server.push_raw("garbage");
    server.connect();
    assert_eq!(next_event(&mut events).await, PresenceEvent::Connected);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn transport_error_closes_the_coordinator() {
    let (mut coordinator, mut events, mut server) = start();
    authenticated(&server, &mut events).await;

    server.push_error(PresenceError::TransportReceive("connection reset".into()));
    match next_event(&mut events).await {
        PresenceEvent::Closed {
            reason: Some(reason),
        } => assert!(reason.contains("connection reset"), "reason: {reason}"),
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(!coordinator.is_connected());
    assert!(!coordinator.is_authenticated());

    coordinator.join_room("Travel", "exam-7");
    server.assert_nothing_sent().await;

    coordinator.shutdown().await;
}

#[tokio::test]
async fn unmodeled_events_are_forwarded() {
    let (mut coordinator, mut events, server) = start();
    connected(&server, &mut events).await;

    server.push(Frame::new("speaking_turn", Some(json!({ "userId": "u1" }))));
    assert_eq!(
        next_event(&mut events).await,
        PresenceEvent::Message {
            event: "speaking_turn".into(),
            data: Some(json!({ "userId": "u1" })),
        }
    );

    coordinator.shutdown().await;
}
