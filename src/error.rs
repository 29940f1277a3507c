//! Error types for the bingo sync client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::gate::BlockReason;
use crate::number::NumberCode;
use crate::protocol::CardIndex;

/// Errors that can occur when using the bingo sync client.
///
/// None of these are fatal to the reconciliation core: malformed, stale and
/// duplicate events are reported as discard/outcome values, not errors.
#[derive(Debug, Error)]
pub enum BingoSyncError {
    /// The transport refused an outbound frame.
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// Reading the next inbound frame failed.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The link to the room server is gone.
    #[error("transport closed")]
    TransportClosed,

    /// A client message could not be encoded.
    #[error("json encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a running client loop.
    #[error("client is not connected")]
    NotConnected,

    /// Attempted a room operation but no room subscription is open.
    #[error("no room subscription is open")]
    NotInRoom,

    /// The server answered with an error; `message` is kept verbatim.
    #[error("server rejected the request: {message}")]
    ServerError {
        message: String,
        error_code: Option<ErrorCode>,
    },

    /// No local card exists at this index.
    #[error("no card at index {0}")]
    UnknownCard(CardIndex),

    /// The card interaction gate refused the action.
    #[error("card interaction blocked: {0:?}")]
    Blocked(BlockReason),

    /// The card opens as a winner view in a finished room; it cannot be edited.
    #[error("card is shown as a winner view")]
    Spectating,

    /// Only called numbers can be marked.
    #[error("number {0} has not been called")]
    NotCalled(NumberCode),

    /// The authoritative room snapshot did not arrive.
    #[error("room state synchronization failed: {0}")]
    SyncFailed(String),

    /// A connection attempt or request ran past its deadline.
    #[error("timed out")]
    Timeout,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for bingo sync client operations.
pub type Result<T> = std::result::Result<T, BingoSyncError>;
