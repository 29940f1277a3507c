//! Transport abstraction for the bingo room protocol.
//!
//! The [`Transport`] trait is a bidirectional text message channel between the
//! client and the game server. Every frame is one JSON document, so each
//! implementation handles framing internally (WebSocket frames, SSE lines,
//! length-prefixed TCP).
//!
//! The client reconnects on its own, so instead of a connected transport it
//! takes a [`Connector`] that can produce a fresh one on demand.
//!
//! # In-process transport
//!
//! A pair of channels is enough to drive the client, for example from a
//! local simulator:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use bingo_sync_client::error::BingoSyncError;
//! use bingo_sync_client::transport::{Connector, Transport};
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     to_server: mpsc::UnboundedSender<String>,
//!     from_server: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
//!         self.to_server
//!             .send(message)
//!             .map_err(|e| BingoSyncError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
//!         // mpsc::Receiver::recv is cancel-safe.
//!         self.from_server.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), BingoSyncError> {
//!         self.from_server.close();
//!         Ok(())
//!     }
//! }
//!
//! struct OneShot(Option<ChannelTransport>);
//!
//! #[async_trait]
//! impl Connector for OneShot {
//!     type Transport = ChannelTransport;
//!
//!     async fn connect(&mut self) -> Result<ChannelTransport, BingoSyncError> {
//!         self.0.take().ok_or(BingoSyncError::TransportClosed)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::BingoSyncError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!` next to the command channel and the tick timer.
/// If `recv` is cancelled before completion, calling it again must not lose
/// data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`BingoSyncError::TransportSend`] if the message could not be
    /// sent.
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError>;

    /// Wait for the next inbound frame.
    ///
    /// `None` means the server ended the connection cleanly; `Some(Err(_))`
    /// means the link broke. Either one makes the client reconnect.
    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>>;

    /// Shut the link down.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), BingoSyncError>;
}

/// Produces connected transports, once at start and again after every loss.
#[async_trait]
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt and retried with backoff when
    /// the client holds an auth token.
    async fn connect(&mut self) -> Result<Self::Transport, BingoSyncError>;
}
