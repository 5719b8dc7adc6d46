//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries one JSON frame per WebSocket text message.
//! Both `ws://` and `wss://` URLs are supported; TLS is handled via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! WebSocket has no named lifecycle events, so the transport synthesises
//! them: the first [`recv`](Transport::recv) yields a `connect` frame, and a
//! server close yields one `disconnect` frame before `None`. This transport
//! does not reconnect by itself.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::PresenceError;
use crate::protocol::{Frame, EVENT_CONNECT, EVENT_DISCONNECT};
use crate::transport::Transport;

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Join a base URL and a namespace into the URL of that namespace.
///
/// ```
/// use speaking_presence::transports::websocket::namespace_url;
///
/// assert_eq!(
///     namespace_url("ws://localhost:4000/", "/speaking"),
///     "ws://localhost:4000/speaking"
/// );
/// ```
pub fn namespace_url(base_url: &str, namespace: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        namespace.trim_start_matches('/')
    )
}

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: the synthetic frames are
/// returned without awaiting, and the stream's `next()` does not lose
/// messages when dropped.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    connect_reported: bool,
    disconnect_reported: bool,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Io`] if the URL is invalid or the connection
    /// cannot be established. I/O error kinds are preserved; everything else
    /// maps to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, PresenceError> {
        tracing::debug!(url = %url, "connecting to WebSocket server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            PresenceError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Connect to `namespace` under `base_url`, e.g. the `"speaking"`
    /// namespace at `ws://host/speaking`.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_namespace(base_url: &str, namespace: &str) -> Result<Self, PresenceError> {
        Self::connect(&namespace_url(base_url, namespace)).await
    }

    /// Wrap an already-established WebSocket stream, for custom TLS, proxy
    /// or header setups.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            connect_reported: false,
            disconnect_reported: false,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Timeout`] if the deadline elapses, or any
    /// error [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, PresenceError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| PresenceError::Timeout)?
    }

    /// Yield the `disconnect` frame once, then `None`.
    fn end_of_stream(&mut self) -> Option<Result<String, PresenceError>> {
        if self.disconnect_reported || self.closed {
            return None;
        }
        self.disconnect_reported = true;
        Some(Frame::bare(EVENT_DISCONNECT).encode())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), PresenceError> {
        if self.closed {
            return Err(PresenceError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, PresenceError>> {
        if !self.connect_reported {
            self.connect_reported = true;
            return Some(Frame::bare(EVENT_CONNECT).encode());
        }
        if self.disconnect_reported {
            return None;
        }

        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(PresenceError::TransportReceive(e.to_string())));
                }
                None => return self.end_of_stream(),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return self.end_of_stream();
                }
                Message::Ping(_) => {
                    // tungstenite queues the pong itself.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), PresenceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| PresenceError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn namespace_url_handles_slashes() {
        assert_eq!(namespace_url("ws://h:1", "speaking"), "ws://h:1/speaking");
        assert_eq!(namespace_url("ws://h:1/", "speaking"), "ws://h:1/speaking");
        assert_eq!(namespace_url("ws://h:1", "/speaking"), "ws://h:1/speaking");
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, PresenceError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, PresenceError::Io(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    fn event_of(text: &str) -> String {
        Frame::decode(text).unwrap().event
    }

    #[tokio::test]
    async fn first_frame_is_synthetic_connect() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"event":"authenticated"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        assert_eq!(event_of(&transport.recv().await.unwrap().unwrap()), "connect");
        assert_eq!(
            event_of(&transport.recv().await.unwrap().unwrap()),
            "authenticated"
        );
    }

    #[tokio::test]
    async fn server_close_yields_disconnect_then_none() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let _connect = transport.recv().await;

        assert_eq!(
            event_of(&transport.recv().await.unwrap().unwrap()),
            "disconnect"
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"after_binary"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let _connect = transport.recv().await;

        let text = transport.recv().await.unwrap().unwrap();
        assert_eq!(event_of(&text), "after_binary");
    }

    #[tokio::test]
    async fn send_reaches_server() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<String>();
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = seen_tx.send(text.to_string());
            }
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect_namespace(&url, "speaking")
            .await
            .unwrap();
        let join = r#"{"event":"join_room","data":{"topic":"Travel","examId":"exam-7"}}"#;
        transport.send(join.to_string()).await.unwrap();

        assert_eq!(seen_rx.await.unwrap(), join);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, PresenceError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address.
        let err = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PresenceError::Timeout));
    }
}
