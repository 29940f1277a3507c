//! Built-in transports.
//!
//! | Feature               | Transport              | Connector              |
//! |-----------------------|------------------------|------------------------|
//! | `transport-websocket` | [`WebSocketTransport`] | [`WebSocketConnector`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
