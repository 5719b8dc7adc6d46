//! # WebSocket Room Demo
//!
//! Connects to the `speaking` namespace of a real server, joins a room and
//! prints presence snapshots until Ctrl-C.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example websocket_room -- ws://localhost:4000 Environment exam-42
//! ```

use speaking_presence::protocol::SPEAKING_NAMESPACE;
use speaking_presence::{PresenceConfig, PresenceCoordinator, PresenceEvent, WebSocketTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "ws://localhost:4000".into());
    let topic = args.next().unwrap_or_else(|| "Environment".into());
    let exam_id = args.next().unwrap_or_else(|| "exam-42".into());

    let transport = WebSocketTransport::connect_with_timeout(
        &speaking_presence::transports::websocket::namespace_url(&base_url, SPEAKING_NAMESPACE),
        std::time::Duration::from_secs(5),
    )
    .await?;

    let (mut coordinator, mut events) =
        PresenceCoordinator::start(transport, PresenceConfig::new());
    coordinator.join_room(topic.clone(), exam_id);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(PresenceEvent::RoomUsersUpdated { users }) => {
                        tracing::info!("{} online in {topic}", users.len());
                        for user in &users {
                            tracing::info!("  {} ({})", user.display_name, user.id);
                        }
                    }
                    Some(PresenceEvent::Closed { reason }) => {
                        tracing::info!("closed: {}", reason.as_deref().unwrap_or("clean"));
                        break;
                    }
                    None => break,
                    Some(other) => tracing::info!("event: {other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("leaving {topic}");
                coordinator.leave_room(topic.clone());
                break;
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
