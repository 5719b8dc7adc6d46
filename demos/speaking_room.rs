//! # Speaking Room Demo
//!
//! Drives a [`PresenceCoordinator`] against an in-process fake server over a
//! loopback [`Transport`]. Shows the join being held back until the server
//! authenticates the connection, then presence snapshots arriving.
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example speaking_room
//! ```

use async_trait::async_trait;
use serde_json::json;
use speaking_presence::protocol::Frame;
use speaking_presence::{
    PresenceConfig, PresenceCoordinator, PresenceError, PresenceEvent, Transport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based loopback transport
// ─────────────────────────────────────────────────────────────────────

/// Client half, handed to `PresenceCoordinator::start`.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half, used by the fake server below.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
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
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A fake server
// ─────────────────────────────────────────────────────────────────────

async fn fake_server(
    mut server: LoopbackServer,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    server.tx.send(Frame::bare("connect").encode()?)?;

    // Authentication lands a little after the transport connects.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    server.tx.send(Frame::bare("authenticated").encode()?)?;

    while let Some(text) = server.rx.recv().await {
        let frame = Frame::decode(&text)?;
        tracing::info!(event = %frame.event, "server received {:?}", frame.data);

        if frame.event == "join_room" {
            let users = json!({
                "users": [
                    {"id": "u1", "displayName": "Linh", "avatar": "https://cdn.example/linh.png"},
                    {"id": "u2", "displayName": "Omar"}
                ]
            });
            server
                .tx
                .send(Frame::new("room_users_update", Some(users)).encode()?)?;

            let users = json!({ "users": [{"id": "u1", "displayName": "Linh"}] });
            server
                .tx
                .send(Frame::new("room_users_update", Some(users)).encode()?)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire it together
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, server) = loopback_pair();
    let server_task = tokio::spawn(fake_server(server));

    let (mut coordinator, mut events) =
        PresenceCoordinator::start(transport, PresenceConfig::new());

    // Called right away; the coordinator holds it until `authenticated`.
    coordinator.join_room("Environment", "exam-42");

    let mut snapshots = 0;
    while let Some(event) = events.recv().await {
        match event {
            PresenceEvent::Connected => tracing::info!("connected, waiting for authentication"),
            PresenceEvent::Authenticated => tracing::info!("authenticated, queued join flushed"),
            PresenceEvent::RoomUsersUpdated { users } => {
                let names: Vec<_> = users.iter().map(|u| u.display_name.as_str()).collect();
                tracing::info!("online: {names:?}");
                snapshots += 1;
                if snapshots == 2 {
                    break;
                }
            }
            PresenceEvent::Closed { reason } => {
                tracing::info!("closed: {}", reason.as_deref().unwrap_or("clean"));
                break;
            }
            other => tracing::info!("event: {other:?}"),
        }
    }

    coordinator.leave_room("Environment");
    coordinator.shutdown().await;
    tracing::info!(
        "after shutdown: {} online",
        coordinator.current_online_users().len()
    );

    server_task.abort();
    Ok(())
}
