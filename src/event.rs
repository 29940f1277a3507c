//! Events emitted by the client to the application.
//!
//! Render state lives in the [`RoomView`](crate::session::RoomView) watch
//! channel; [`BingoEvent`]s report what happened so the application can react
//! (play a sound, show a recharge prompt, log a discard).

use std::time::Duration;

use crate::error_codes::ErrorCode;
use crate::normalizer::DiscardedEvent;
use crate::protocol::{CardId, EventKind, RoomId};
use crate::round::Outcome;
use crate::session::{SessionNotice, SubscriptionId};

/// Events delivered on the receiver returned by
/// [`BingoClient::start`](crate::client::BingoClient::start).
#[derive(Debug, Clone, PartialEq)]
pub enum BingoEvent {
    /// The transport connected (or reconnected) and the room was joined.
    Connected,
    /// The transport was lost; another attempt follows after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The authoritative snapshot landed.
    Synchronized {
        round_number: u32,
        /// Events received during the gap and dropped in favor of the snapshot.
        discarded_events: usize,
    },
    /// The snapshot did not arrive in time; another request was sent.
    SyncFailed { attempt: u32, reason: String },
    /// A room event went through the round store.
    RoomUpdated { kind: EventKind, outcome: Outcome },
    /// An inbound frame was dropped by the normalizer.
    EventDiscarded(DiscardedEvent),
    RoundAdvanced { round_number: u32 },
    /// The claim window closed; validation UI was force-closed.
    ClaimWindowClosed,
    RoomFinished,
    ClaimAccepted { card_id: CardId },
    /// The server refused the local claim request.
    ///
    /// `message` is the server's text, unaltered; when
    /// `insufficient_balance` is set the UI appends its recharge hint.
    ClaimRejected {
        card_id: CardId,
        message: String,
        error_code: Option<ErrorCode>,
        insufficient_balance: bool,
    },
    BingoConfirmed { card_id: CardId },
    BingoRejected { card_id: CardId },
    /// A new room subscription replaced the previous one.
    RoomSwitched {
        room_id: RoomId,
        subscription_id: SubscriptionId,
    },
    /// The client stopped. Always the last event.
    Disconnected { reason: Option<String> },
}

impl From<SessionNotice> for BingoEvent {
    fn from(notice: SessionNotice) -> Self {
        match notice {
            SessionNotice::RoundAdvanced { round_number } => Self::RoundAdvanced { round_number },
            SessionNotice::ClaimWindowClosed => Self::ClaimWindowClosed,
            SessionNotice::RoomFinished => Self::RoomFinished,
            SessionNotice::ClaimAccepted { card_id } => Self::ClaimAccepted { card_id },
            SessionNotice::ClaimRejected {
                card_id,
                message,
                error_code,
                insufficient_balance,
            } => Self::ClaimRejected {
                card_id,
                message,
                error_code,
                insufficient_balance,
            },
            SessionNotice::BingoConfirmed { card_id } => Self::BingoConfirmed { card_id },
            SessionNotice::BingoRejected { card_id } => Self::BingoRejected { card_id },
        }
    }
}
