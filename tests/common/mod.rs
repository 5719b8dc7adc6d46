#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the speaking-presence integration tests.
//!
//! Provides a channel-backed loopback transport whose server half lets a test
//! inject inbound frames at chosen moments and read what the client sent.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use speaking_presence::protocol::{
    Frame, RoomUser, EVENT_AUTHENTICATED, EVENT_CONNECT, EVENT_CONNECT_ERROR, EVENT_DISCONNECT,
    EVENT_ROOM_USERS_UPDATE,
};
use speaking_presence::{PresenceError, PresenceEvent, Transport};
use tokio::sync::mpsc;

/// How long a test waits before concluding nothing was sent.
pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Upper bound for anything a test expects to happen.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

// ── Loopback transport ──────────────────────────────────────────────

/// Client half, handed to `PresenceCoordinator::start`.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<Result<String, PresenceError>>,
}

/// Server half, driven by the test.
pub struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<Result<String, PresenceError>>,
}

pub fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        self.tx
            .send(frame)
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        self.rx.close();
        Ok(())
    }
}

impl LoopbackServer {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: Frame) {
        self.tx.send(Ok(frame.encode().unwrap())).unwrap();
    }

    /// Deliver raw text to the client.
    pub fn push_raw(&self, text: &str) {
        self.tx.send(Ok(text.to_string())).unwrap();
    }

    /// Deliver a transport error to the client.
    pub fn push_error(&self, error: PresenceError) {
        self.tx.send(Err(error)).unwrap();
    }

    pub fn connect(&self) {
        self.push(Frame::bare(EVENT_CONNECT));
    }

    pub fn authenticate(&self) {
        self.push(Frame::bare(EVENT_AUTHENTICATED));
    }

    pub fn disconnect(&self) {
        self.push(Frame::bare(EVENT_DISCONNECT));
    }

    pub fn connect_error(&self, message: &str) {
        self.push(Frame::new(
            EVENT_CONNECT_ERROR,
            Some(json!({ "message": message })),
        ));
    }

    pub fn room_users(&self, users: &[RoomUser]) {
        self.push(Frame::new(
            EVENT_ROOM_USERS_UPDATE,
            Some(json!({ "users": users })),
        ));
    }

    /// Next frame the client sent; panics after [`EXPECT_TIMEOUT`].
    pub async fn next_sent(&mut self) -> Frame {
        let text = tokio::time::timeout(EXPECT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client side of the loopback closed");
        Frame::decode(&text).unwrap()
    }

    /// Asserts the client sends nothing for [`QUIET_PERIOD`].
    pub async fn assert_nothing_sent(&mut self) {
        if let Ok(Some(text)) = tokio::time::timeout(QUIET_PERIOD, self.rx.recv()).await {
            panic!("expected no client frame, got {text}");
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn user(id: &str, name: &str) -> RoomUser {
    RoomUser::new(id, name).with_avatar(format!("https://cdn.example/{id}.png"))
}

pub fn join_payload(topic: &str, exam_id: &str) -> Value {
    json!({ "topic": topic, "examId": exam_id })
}

/// Receive the next event, skipping none; panics after [`EXPECT_TIMEOUT`].
pub async fn next_event(rx: &mut mpsc::Receiver<PresenceEvent>) -> PresenceEvent {
    tokio::time::timeout(EXPECT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Consume events until `wanted` is seen.
pub async fn wait_for(rx: &mut mpsc::Receiver<PresenceEvent>, wanted: &PresenceEvent) {
    loop {
        let event = next_event(rx).await;
        if &event == wanted {
            return;
        }
        assert!(
            !matches!(event, PresenceEvent::Closed { .. }),
            "closed before {wanted:?}"
        );
    }
}
