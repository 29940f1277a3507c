//! # Bingo Sync Client
//!
//! Transport-agnostic client-side state reconciliation for multiplayer bingo
//! rooms.
//!
//! The server pushes round events (numbers called, claims, countdowns, round
//! transitions) over a lossy, reordering link. This crate turns that stream
//! into one consistent view of the room: which numbers are visible, whether
//! the local player may still claim, which winners to show, and which modals
//! and animations belong on screen.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   text-framed backend
//! - **Self-healing**: reconnects with backoff and reconciles from one
//!   authoritative snapshot per connection
//! - **Render-ready**: the latest [`RoomView`] is always available through a
//!   watch channel
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   `WebSocketConnector`
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`normalizer`] | Raw frames to typed [`RoomEvent`]s, with discard reasons |
//! | [`round`] | Idempotent, round-scoped state store |
//! | [`claim`] | Per-round "I claimed" flag, readable without blocking |
//! | [`gate`] | Card access and loser-animation rules |
//! | [`modal`] | Modal priority, animations and notifications |
//! | [`session`] | One room subscription tying the above together |
//! | [`sync`] | Snapshot-after-reconnect bookkeeping |
//! | [`client`] | Async handle and transport loop |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn run() {
//! use bingo_sync_client::{BingoClient, BingoClientConfig, BingoEvent, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://bingo.example/rooms");
//! let config = BingoClientConfig::new("room-42")
//!     .with_auth_token("token")
//!     .with_user_id("user-7");
//! let (mut client, mut events) = BingoClient::start(connector, config);
//!
//! while let Some(event) = events.recv().await {
//!     if let BingoEvent::Disconnected { .. } = event {
//!         break;
//!     }
//!     let view = client.view();
//!     println!("round {} called {:?}", view.round_number, view.last_numbers);
//! }
//! client.shutdown().await;
//! # }
//! ```

pub mod claim;
pub mod client;
pub mod countdown;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod gate;
pub mod modal;
pub mod normalizer;
pub mod number;
pub mod protocol;
pub mod round;
pub mod session;
pub mod sync;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{BingoClient, BingoClientConfig};
pub use error::BingoSyncError;
pub use error_codes::ErrorCode;
pub use event::BingoEvent;
pub use number::NumberCode;
pub use protocol::{ClientMessage, RoomEvent};
pub use session::{RoomSession, RoomView};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
