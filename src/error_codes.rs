//! Error codes for structured error handling in the bingo room protocol.
//!
//! These codes arrive on claim results and server errors and serialize using
//! `SCREAMING_SNAKE_CASE` to match the server's JSON format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the bingo server.
///
/// Unknown codes deserialize to [`ErrorCode::Unknown`] so that a newer server
/// never makes a claim result unreadable.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    Unauthorized,
    InvalidToken,

    // Wallet errors
    InsufficientBalance,

    // Room errors
    RoomNotFound,
    RoomFinished,
    NotInRoom,

    // Claim errors
    AlreadyClaimed,
    ClaimWindowClosed,
    CardNotFound,
    CardNotOwned,
    InvalidBingo,
    RoundMismatch,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
    ServiceUnavailable,

    /// Any code this client version does not know about.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Player-facing text for the code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "No valid credentials were presented.",
            Self::InvalidToken => "The session token expired or was revoked. Sign in again.",
            Self::InsufficientBalance => "Your balance is too low to complete this action.",
            Self::RoomNotFound => "This room does not exist or was closed.",
            Self::RoomFinished => "The room has finished. No further rounds will be played.",
            Self::NotInRoom => "You are not enrolled in this room.",
            Self::AlreadyClaimed => "You have already claimed bingo in this round.",
            Self::ClaimWindowClosed => "The bingo claim window for this round has closed.",
            Self::CardNotFound => "The card could not be found.",
            Self::CardNotOwned => "The card does not belong to you.",
            Self::InvalidBingo => "The card does not complete the round's pattern.",
            Self::RoundMismatch => "The claim referenced a round that is no longer active.",
            Self::RateLimitExceeded => "Too many claims or requests. Wait a moment.",
            Self::InternalError => "The bingo server failed to process the request.",
            Self::ServiceUnavailable => "The bingo server is temporarily unavailable.",
            Self::Unknown => "The server reported an unrecognized error.",
        }
    }

    /// Returns `true` for codes that signal the wallet cannot cover the action.
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
