//! Channel lifecycle: the background loop that owns the transport.
//!
//! The loop multiplexes caller commands, inbound frames and the shutdown
//! signal with `tokio::select!`, feeding each one through the [`Session`]
//! transition function and writing whatever it returns to the transport.
//! It is the only place the transport and the session are touched, so no
//! locking is involved.
//!
//! Exits when:
//! - the command channel closes (coordinator dropped)
//! - the shutdown signal fires
//! - the transport returns `None` or a receive error
//! - a send fails

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::event::PresenceEvent;
use crate::protocol::{Frame, InboundEvent, OutboundCommand};
use crate::session::{Command, Session};
use crate::transport::Transport;

/// Flags the loop publishes for the coordinator handle.
#[derive(Debug)]
pub(crate) struct ChannelShared {
    running: AtomicBool,
    connected: AtomicBool,
    authenticated: AtomicBool,
}

impl ChannelShared {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.authenticated.store(false, Ordering::Release);
    }
}

/// Run the channel until one of the exit conditions is met.
pub(crate) async fn run_channel(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<PresenceEvent>,
    mut session: Session,
    shared: Arc<ChannelShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("channel loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        let Some(out) = session.handle_command(cmd) else {
                            continue;
                        };
                        if let Err(e) = write_command(&mut transport, out).await {
                            error!("transport send error: {e}");
                            finish(
                                &mut transport,
                                &mut session,
                                &shared,
                                &event_tx,
                                Some(format!("transport send error: {e}")),
                            ).await;
                            break;
                        }
                    }
                    None => {
                        debug!("command channel closed, shutting down channel loop");
                        finish(
                            &mut transport,
                            &mut session,
                            &shared,
                            &event_tx,
                            Some("coordinator dropped".into()),
                        ).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                finish(
                    &mut transport,
                    &mut session,
                    &shared,
                    &event_tx,
                    Some("coordinator shut down".into()),
                ).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        let frame = match Frame::decode(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("failed to decode inbound frame: {e}; raw: {text}");
                                continue;
                            }
                        };
                        debug!(event = %frame.event, "received frame");

                        let event = InboundEvent::from(frame);
                        let out = session.handle_inbound(&event);
                        publish_flags(&shared, &session);

                        // Reported before the write so a failed flush still
                        // leaves the consumer with the state change ahead of
                        // `Closed`.
                        if let Some(event) = PresenceEvent::from_inbound(event) {
                            emit_event(&event_tx, event);
                        }

                        if let Some(out) = out {
                            if let Err(e) = write_command(&mut transport, out).await {
                                error!("transport send error: {e}");
                                finish(
                                    &mut transport,
                                    &mut session,
                                    &shared,
                                    &event_tx,
                                    Some(format!("transport send error: {e}")),
                                ).await;
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        finish(
                            &mut transport,
                            &mut session,
                            &shared,
                            &event_tx,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    None => {
                        debug!("transport finished");
                        finish(&mut transport, &mut session, &shared, &event_tx, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("channel loop exited");
}

/// Encode and write one command. Encoding failures are logged and skipped;
/// only transport failures are returned.
async fn write_command(transport: &mut impl Transport, command: OutboundCommand) -> Result<()> {
    let event = command.event_name().to_owned();
    let text = match command.into_frame().and_then(|frame| frame.encode()) {
        Ok(text) => text,
        Err(e) => {
            error!(event = %event, "failed to encode outbound frame: {e}");
            return Ok(());
        }
    };
    debug!(event = %event, "sending frame");
    transport.send(text).await
}

fn publish_flags(shared: &ChannelShared, session: &Session) {
    if !shared.is_running() {
        return;
    }
    shared
        .connected
        .store(session.is_connected(), Ordering::Release);
    shared
        .authenticated
        .store(session.is_authenticated(), Ordering::Release);
}

async fn close_transport(transport: &mut impl Transport) {
    if let Err(e) = transport.close().await {
        debug!("transport close failed: {e}");
    }
}

/// Close the transport, tear the session down, publish the stopped state
/// and deliver `Closed`.
///
/// `Closed` is sent with `send().await` rather than `try_send` because it is
/// the last event and must not be dropped.
async fn finish(
    transport: &mut impl Transport,
    session: &mut Session,
    shared: &ChannelShared,
    event_tx: &mpsc::Sender<PresenceEvent>,
    reason: Option<String>,
) {
    close_transport(transport).await;
    session.teardown();
    shared.mark_stopped();
    if event_tx.send(PresenceEvent::Closed { reason }).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

/// Deliver an event without blocking the loop. Dropped when the consumer
/// is behind.
fn emit_event(event_tx: &mpsc::Sender<PresenceEvent>, event: PresenceEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}
