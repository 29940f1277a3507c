//! WebSocket transport using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries room frames over one WebSocket connection;
//! [`WebSocketConnector`] dials a fresh one for every (re)connect. Requires
//! the default `transport-websocket` feature.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), bingo_sync_client::BingoSyncError> {
//! use std::time::Duration;
//! use bingo_sync_client::{Connector, Transport, WebSocketConnector};
//!
//! let mut connector = WebSocketConnector::new("ws://localhost:8080/rooms")
//!     .with_timeout(Duration::from_secs(5));
//! let mut transport = connector.connect().await?;
//! transport
//!     .send(r#"{"type":"request-room-state","data":{"room_id":"r1"}}"#.to_string())
//!     .await?;
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("snapshot: {frame}");
//! }
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::BingoSyncError;
use crate::transport::{Connector, Transport};

/// Client-side stream accepted by [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Room frames over a WebSocket.
///
/// Text frames carry room events; binary frames are skipped. For custom TLS
/// or headers build the stream yourself and use
/// [`WebSocketTransport::from_stream`].
///
/// [`recv`](Transport::recv) is cancel-safe: `StreamExt::next` holds no
/// partially read frame across cancellation.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::Io`] if the URL is invalid or the connection
    /// cannot be established, keeping the I/O error kind when there is one.
    pub async fn connect(url: &str) -> Result<Self, BingoSyncError> {
        tracing::debug!(url = %url, "connecting to room server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            BingoSyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "room server connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::Timeout`] if the deadline elapses.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, BingoSyncError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| BingoSyncError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
        if self.closed {
            return Err(BingoSyncError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(BingoSyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "room server sent close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(bytes) => {
                    tracing::warn!(len = bytes.len(), "skipping binary frame");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), BingoSyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
    }
}

/// Dials a new [`WebSocketTransport`] for every (re)connect.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: None,
        }
    }

    /// Bound every connection attempt by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&mut self) -> Result<WebSocketTransport, BingoSyncError> {
        match self.timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(&self.url, timeout).await,
            None => WebSocketTransport::connect(&self.url).await,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const NUMBER_CALLED: &str =
        r#"{"event":"number-called","data":{"room_id":"r1","round_number":1,"number":"B-7"}}"#;

    /// Accept one WebSocket connection on a local port and run `handler` on it.
    async fn serve_once<F, Fut>(handler: F) -> String
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

    #[test]
    fn transport_and_connector_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
        assert_send::<WebSocketConnector>();
    }

    #[tokio::test]
    async fn malformed_url_is_an_io_error() {
        let err = WebSocketTransport::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, BingoSyncError::Io(_)));
    }

    #[tokio::test]
    async fn connector_times_out_when_handshake_stalls() {
        // Accepts the TCP connection but never answers the upgrade request.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut connector =
            WebSocketConnector::new(format!("ws://{addr}")).with_timeout(Duration::from_millis(50));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, BingoSyncError::Timeout));
        silent.abort();
    }

    #[tokio::test]
    async fn recv_yields_room_frames_and_skips_binary() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![0xB1, 0x60].into()))
                .await
                .unwrap();
            ws.send(Message::Text(NUMBER_CALLED.into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new(url).connect().await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), NUMBER_CALLED);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn sent_requests_reach_the_server() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let request = r#"{"type":"request-room-state","data":{"room_id":"r1"}}"#;
        transport.send(request.to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), request);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_send() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
            .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, BingoSyncError::TransportClosed));
    }
}
