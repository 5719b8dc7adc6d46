//! Presence coordinator: the public façade for a speaking room.
//!
//! [`PresenceCoordinator`] is a thin handle over a background channel loop.
//! Calls are queued on an unbounded MPSC channel and return immediately;
//! the loop applies them in order, holding joins back until the server has
//! authenticated the connection. Presence is read through a
//! [`watch::Receiver`], and lifecycle events arrive on the bounded receiver
//! returned from [`PresenceCoordinator::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect_namespace(url, SPEAKING_NAMESPACE).await?;
//! let (coordinator, mut events) = PresenceCoordinator::start(transport, PresenceConfig::new());
//!
//! // Safe to call before the server has authenticated us.
//! coordinator.join_room("Environment", "exam-42");
//!
//! let mut online = coordinator.online_users();
//! while online.changed().await.is_ok() {
//!     render(&online.borrow_and_update());
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::channel::{run_channel, ChannelShared};
use crate::event::PresenceEvent;
use crate::protocol::{JoinIntent, RoomUser};
use crate::session::{Command, Session, SessionOptions};
use crate::store::PresenceStore;
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`PresenceCoordinator`].
///
/// # Example
///
/// ```
/// use speaking_presence::PresenceConfig;
/// use std::time::Duration;
///
/// let config = PresenceConfig::new()
///     .with_event_channel_capacity(64)
///     .with_shutdown_timeout(Duration::from_millis(250))
///     .with_cancel_pending_join_on_leave(false);
/// assert_eq!(config.event_channel_capacity, 64);
/// assert!(!config.cancel_pending_join_on_leave);
/// ```
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning so
    /// the loop never blocks. `Closed` is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`PresenceCoordinator::shutdown`] waits for the loop to close
    /// the transport before aborting it.
    ///
    /// Defaults to **1 second**. Zero aborts immediately.
    pub shutdown_timeout: Duration,
    /// Whether `leave_room(topic)` discards a join for the same topic that is
    /// still waiting for authentication.
    ///
    /// Defaults to **true**. With `false` both intents go out independently
    /// once the server authenticates.
    pub cancel_pending_join_on_leave: bool,
}

impl PresenceConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cancel_pending_join_on_leave: true,
        }
    }

    /// Set the capacity of the bounded event channel. Clamped to at least 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Choose whether a leave cancels a still-pending join for its topic.
    #[must_use]
    pub fn with_cancel_pending_join_on_leave(mut self, cancel: bool) -> Self {
        self.cancel_pending_join_on_leave = cancel;
        self
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            cancel_pending_join_on_leave: self.cancel_pending_join_on_leave,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Coordinator handle ──────────────────────────────────────────────

/// Handle for one speaking-room connection.
///
/// Owns the background loop (and through it the transport) for its whole
/// lifetime. Dropping the handle aborts the loop and empties the presence
/// snapshot; [`shutdown`](Self::shutdown) does the same gracefully.
///
/// None of the operations fail. Once the loop has stopped they are
/// silently ignored.
pub struct PresenceCoordinator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<ChannelShared>,
    store: PresenceStore,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PresenceCoordinator {
    /// Take ownership of `transport` and start the channel loop.
    ///
    /// The transport should report `connect` once bytes can flow and
    /// `authenticated` once the server knows who the caller is; joins are
    /// held back until the latter.
    ///
    /// # Returns
    ///
    /// The handle plus a receiver of [`PresenceEvent`]s, which ends with
    /// [`PresenceEvent::Closed`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: PresenceConfig,
    ) -> (Self, mpsc::Receiver<PresenceEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // tokio panics on a zero-capacity channel.
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<PresenceEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let store = PresenceStore::new();
        let session = Session::new(store.clone(), config.session_options());
        let shared = Arc::new(ChannelShared::new());

        let task = tokio::spawn(run_channel(
            transport,
            cmd_rx,
            event_tx,
            session,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        let coordinator = Self {
            cmd_tx,
            shared,
            store,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (coordinator, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Ask to join the room identified by `topic` and `exam_id`.
    ///
    /// Sent immediately when authenticated, otherwise parked until the
    /// server authenticates the connection. Only the latest parked join is
    /// kept. Empty strings are passed through for the server to judge.
    pub fn join_room(&self, topic: impl Into<String>, exam_id: impl Into<String>) {
        self.send(Command::Join(JoinIntent::new(topic, exam_id)));
    }

    /// Ask to leave the room for `topic`. Sent regardless of authentication.
    pub fn leave_room(&self, topic: impl Into<String>) {
        self.send(Command::Leave {
            topic: topic.into(),
        });
    }

    /// Send an arbitrary event. Not gated and changes no local state.
    pub fn emit(&self, event: impl Into<String>, payload: Option<serde_json::Value>) {
        self.send(Command::Emit {
            event: event.into(),
            data: payload,
        });
    }

    /// Shut down: close the transport, stop the loop, empty the snapshot.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        debug!("PresenceCoordinator: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Bound the wait; a loop stuck in `close()` is aborted.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.mark_stopped();
        self.store.close();
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Reactive view of the presence snapshot.
    pub fn online_users(&self) -> watch::Receiver<Vec<RoomUser>> {
        self.store.subscribe()
    }

    /// A copy of the current presence snapshot.
    pub fn current_online_users(&self) -> Vec<RoomUser> {
        self.store.snapshot()
    }

    /// `true` between a `connect` and the next `disconnect` or teardown.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// `true` once the server has authenticated the current connection.
    pub fn is_authenticated(&self) -> bool {
        self.shared.is_authenticated()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, command: Command) {
        if !self.shared.is_running() {
            debug!("channel stopped, ignoring {command:?}");
            return;
        }
        if let Err(mpsc::error::SendError(command)) = self.cmd_tx.send(command) {
            debug!("channel loop gone, ignoring {command:?}");
        }
    }
}

impl std::fmt::Debug for PresenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceCoordinator")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("online_users", &self.store.snapshot().len())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PresenceCoordinator {
    fn drop(&mut self) {
        // No executor to drive a graceful close here, so abort the loop;
        // dropping its future drops the transport. The abort takes effect at
        // the loop's next await, so close the store first.
        self.shared.mark_stopped();
        self.store.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::PresenceError;
    use crate::protocol::{Frame, EVENT_AUTHENTICATED, EVENT_CONNECT, EVENT_JOIN_ROOM};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Replays scripted frames, records sent ones.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, PresenceError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, PresenceError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), PresenceError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PresenceError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Script exhausted; stay open until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), PresenceError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn frame(event: &str) -> Option<std::result::Result<String, PresenceError>> {
        Some(Ok(Frame::bare(event).encode().unwrap()))
    }

    fn users_frame(ids: &[&str]) -> Option<std::result::Result<String, PresenceError>> {
        let users: Vec<_> = ids.iter().map(|id| RoomUser::new(*id, *id)).collect();
        let data = serde_json::json!({ "users": users });
        Some(Ok(Frame::new("room_users_update", Some(data)).encode().unwrap()))
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_and_authenticated_update_flags() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![frame(EVENT_CONNECT), frame(EVENT_AUTHENTICATED)]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Authenticated);
        assert!(coordinator.is_connected());
        assert!(coordinator.is_authenticated());

        coordinator.shutdown().await;
        assert!(!coordinator.is_connected());
        assert!(!coordinator.is_authenticated());
    }

    #[tokio::test]
    async fn join_after_authenticated_is_sent() {
        let (transport, sent, _closed) =
            MockTransport::new(vec![frame(EVENT_CONNECT), frame(EVENT_AUTHENTICATED)]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // Authenticated

        coordinator.join_room("Travel", "exam-7");
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let messages = sent.lock().unwrap();
            assert_eq!(messages.len(), 1);
            let sent_frame = Frame::decode(&messages[0]).unwrap();
            assert_eq!(sent_frame.event, EVENT_JOIN_ROOM);
            assert_eq!(
                sent_frame.data,
                Some(serde_json::json!({"topic": "Travel", "examId": "exam-7"}))
            );
        }

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn presence_updates_reach_online_users() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            frame(EVENT_CONNECT),
            users_frame(&["a", "b"]),
            users_frame(&["a"]),
        ]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // [a, b]
        let last = events.recv().await.unwrap();
        assert_eq!(
            last,
            PresenceEvent::RoomUsersUpdated {
                users: vec![RoomUser::new("a", "a")]
            }
        );
        assert_eq!(coordinator.current_online_users(), vec![RoomUser::new("a", "a")]);

        coordinator.shutdown().await;
        assert!(coordinator.current_online_users().is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_closed() {
        let (transport, _sent, closed) = MockTransport::new(vec![frame(EVENT_CONNECT)]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await; // Connected
        coordinator.shutdown().await;

        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Closed {
                reason: Some("coordinator shut down".into())
            }
        );
        assert!(events.recv().await.is_none());

        // Second shutdown is a no-op.
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn calls_after_shutdown_are_ignored() {
        let (transport, sent, _closed) =
            MockTransport::new(vec![frame(EVENT_CONNECT), frame(EVENT_AUTHENTICATED)]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await;
        let _ = events.recv().await;
        coordinator.shutdown().await;

        coordinator.join_room("Travel", "exam-7");
        coordinator.leave_room("Travel");
        coordinator.emit("raise_hand", None);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_transport_end_emits_closed_without_reason() {
        let (transport, _sent, _closed) = MockTransport::new(vec![frame(EVENT_CONNECT), None]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Closed { reason: None }
        );
        assert!(!coordinator.is_connected());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn receive_error_emits_closed_with_reason() {
        let (transport, _sent, closed) = MockTransport::new(vec![
            frame(EVENT_CONNECT),
            Some(Err(PresenceError::TransportReceive("reset".into()))),
        ]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await; // Connected
        match events.recv().await.unwrap() {
            PresenceEvent::Closed { reason: Some(reason) } => {
                assert!(reason.contains("reset"), "unexpected reason: {reason}");
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(closed.load(Ordering::Relaxed));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok("{not json".into())),
            frame(EVENT_CONNECT),
        ]);
        let (mut coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Connected);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn drop_empties_the_snapshot_seen_by_subscribers() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![frame(EVENT_CONNECT), users_frame(&["a"])]);
        let (coordinator, mut events) =
            PresenceCoordinator::start(transport, PresenceConfig::new());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // RoomUsersUpdated

        let online = coordinator.online_users();
        assert_eq!(online.borrow().len(), 1);
        drop(coordinator);
        assert!(online.borrow().is_empty());
    }

    /// Transport fed by the test whose writes always fail.
    struct BrokenSendTransport {
        incoming: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl Transport for BrokenSendTransport {
        async fn send(&mut self, _frame: String) -> std::result::Result<(), PresenceError> {
            Err(PresenceError::TransportSend("broken pipe".into()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PresenceError>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), PresenceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_join_flush_still_reports_authenticated() {
        let (server_tx, incoming) = mpsc::unbounded_channel();
        let (mut coordinator, mut events) = PresenceCoordinator::start(
            BrokenSendTransport { incoming },
            PresenceConfig::new(),
        );

        server_tx.send(Frame::bare(EVENT_CONNECT).encode().unwrap()).unwrap();
        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Connected);

        coordinator.join_room("Travel", "exam-7");
        tokio::time::sleep(Duration::from_millis(20)).await;
        server_tx.send(Frame::bare(EVENT_AUTHENTICATED).encode().unwrap()).unwrap();

        assert_eq!(events.recv().await.unwrap(), PresenceEvent::Authenticated);
        match events.recv().await.unwrap() {
            PresenceEvent::Closed { reason: Some(reason) } => {
                assert!(reason.contains("broken pipe"), "unexpected reason: {reason}");
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(!coordinator.is_authenticated());

        coordinator.shutdown().await;
    }

    /// Transport that reports presence snapshots as fast as it is polled.
    struct FloodingTransport {
        connected: bool,
        next_id: u64,
    }

    #[async_trait]
    impl Transport for FloodingTransport {
        async fn send(&mut self, _frame: String) -> std::result::Result<(), PresenceError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PresenceError>> {
            tokio::task::yield_now().await;
            if !self.connected {
                self.connected = true;
                return frame(EVENT_CONNECT);
            }
            self.next_id += 1;
            let id = format!("u{}", self.next_id);
            users_frame(&[id.as_str()])
        }

        async fn close(&mut self) -> std::result::Result<(), PresenceError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_during_presence_flood_leaves_snapshot_empty() {
        for _ in 0..20 {
            let transport = FloodingTransport {
                connected: false,
                next_id: 0,
            };
            let (coordinator, mut events) =
                PresenceCoordinator::start(transport, PresenceConfig::new());
            let online = coordinator.online_users();

            let _ = events.recv().await; // Connected
            let _ = events.recv().await; // first snapshot
            drop(coordinator);

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(online.borrow().is_empty());
        }
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = PresenceConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.cancel_pending_join_on_leave);
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = PresenceConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    /// Transport whose `close()` never finishes.
    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _frame: String) -> std::result::Result<(), PresenceError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, PresenceError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), PresenceError> {
            self.close_called.store(true, Ordering::Relaxed);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_aborts_loop_stuck_in_close() {
        let close_called = Arc::new(AtomicBool::new(false));
        let transport = HangingCloseTransport {
            close_called: Arc::clone(&close_called),
        };
        let config = PresenceConfig::new().with_shutdown_timeout(Duration::from_millis(50));
        let (mut coordinator, _events) = PresenceCoordinator::start(transport, config);

        tokio::time::timeout(Duration::from_secs(2), coordinator.shutdown())
            .await
            .expect("shutdown should not hang");
        assert!(close_called.load(Ordering::Relaxed));
        assert!(!coordinator.is_connected());
    }
}
