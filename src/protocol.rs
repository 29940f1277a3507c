//! Wire-compatible protocol types for the bingo room protocol.
//!
//! Inbound frames are JSON text of the form `{"event": "<kind>", "data": {...}}`
//! and are turned into [`RoomEvent`]s by the [normalizer](crate::normalizer).
//! Outbound frames are [`ClientMessage`]s of the form
//! `{"type": "<kind>", "data": {...}}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorCode;
use crate::number::NumberCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned room identifier.
pub type RoomId = String;

/// Server-assigned card identifier.
pub type CardId = String;

/// Server-assigned user identifier.
pub type UserId = String;

/// Position of a card among the local player's cards.
pub type CardIndex = usize;

// ── Enums ───────────────────────────────────────────────────────────

/// Winning pattern of a round.
///
/// `Full` is reserved for the final round of a room; earlier rounds never
/// use it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    #[default]
    Horizontal,
    Vertical,
    Diagonal,
    CrossSmall,
    Full,
}

impl Pattern {
    /// Returns `true` if this pattern marks the last round of the room.
    pub fn is_final_round(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Why the server is cleaning up a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupType {
    /// Another round follows after the transition countdown.
    #[default]
    NextRound,
    /// The room is over; no further round will start.
    RoomFinished,
    /// A cleanup kind this client version does not know about.
    #[serde(other)]
    Other,
}

/// Room status carried by a `room-state-sync` snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Waiting,
    #[serde(alias = "in_progress", alias = "playing")]
    Active,
    ClaimWindow,
    Transitioning,
    Finished,
    #[serde(other)]
    Unknown,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A winning card, as announced by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Winner {
    pub card_id: CardId,
    pub card_code: String,
    pub user_id: UserId,
    pub user_name: String,
    pub is_first: bool,
    /// Numbers that completed the pattern on this card.
    #[serde(default)]
    pub bingo_numbers: BTreeSet<NumberCode>,
}

/// A number entry inside a `room-state-sync` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalledNumber {
    pub number: NumberCode,
    /// ISO 8601 timestamp; used only to order the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<String>,
}

// ── Event payloads ──────────────────────────────────────────────────

/// Payload of `number-called`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumberCalled {
    pub room_id: RoomId,
    pub round_number: u32,
    pub number: NumberCode,
}

/// Payload of `bingo-claimed`.
///
/// The server sends either a single `winner` or a `winners` batch;
/// [`BingoClaimed::all_winners`] merges both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BingoClaimed {
    pub room_id: RoomId,
    pub round_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<Winner>,
}

impl BingoClaimed {
    /// Every winner in the event, with duplicates by card id removed.
    pub fn all_winners(&self) -> Vec<Winner> {
        let mut out: Vec<Winner> = Vec::with_capacity(self.winners.len() + 1);
        for winner in self.winner.iter().chain(self.winners.iter()) {
            if !out.iter().any(|w| w.card_id == winner.card_id) {
                out.push(winner.clone());
            }
        }
        out
    }
}

/// Payload of `bingo-claim-countdown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BingoClaimCountdown {
    pub room_id: RoomId,
    pub round_number: u32,
    pub seconds_remaining: u32,
}

/// Payload of `round-finished`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundFinished {
    pub room_id: RoomId,
    pub round_number: u32,
}

/// Payload of `round-cleanup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundCleanup {
    pub room_id: RoomId,
    pub previous_round_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_round_number: Option<u32>,
    #[serde(default)]
    pub cleanup_type: CleanupType,
}

/// Payload of `round-transition-countdown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundTransitionCountdown {
    pub room_id: RoomId,
    pub seconds_remaining: u32,
    /// Server wall-clock deadline in Unix milliseconds (display only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_timestamp: Option<i64>,
    pub next_round_number: u32,
    #[serde(default)]
    pub has_winner: bool,
}

/// Payload of `round-started`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundStarted {
    pub room_id: RoomId,
    pub round_number: u32,
    pub pattern: Pattern,
}

/// Payload of `room-state-sync`, the authoritative snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomStateSync {
    pub room_id: RoomId,
    pub round_number: u32,
    pub called_numbers: Vec<CalledNumber>,
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<Winner>,
    /// Whether the local player already claimed in this round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_claimed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_seconds_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_seconds_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub marked_numbers: BTreeMap<CardIndex, Vec<NumberCode>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<CardDetails>,
}

/// Payload of `room-prize-updated`. Retained verbatim for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomPrizeUpdated {
    pub room_id: RoomId,
    pub total_prize: f64,
    pub enrolled_cards_count: u32,
    pub rewards: Vec<serde_json::Value>,
}

/// Payload of `card-details`: one card owned by the local player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardDetails {
    #[serde(default)]
    pub room_id: RoomId,
    pub card_id: CardId,
    pub card_code: String,
    pub card_index: CardIndex,
    /// Number matrix by column; `0` is the FREE cell.
    pub numbers: Vec<Vec<u8>>,
}

impl CardDetails {
    /// Returns `true` if the card's matrix holds `number`.
    pub fn contains(&self, number: NumberCode) -> bool {
        self.numbers
            .iter()
            .any(|column| column.contains(&number.value()))
    }
}

/// Payload of `bingo-validated`: the server's verdict on a claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BingoValidated {
    pub room_id: RoomId,
    pub round_number: u32,
    pub card_id: CardId,
    pub user_id: UserId,
    pub is_valid: bool,
}

/// Payload of `claim-result`: the reply to the local claim-bingo request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimResult {
    pub room_id: RoomId,
    pub round_number: u32,
    pub card_id: CardId,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ClaimResult {
    /// Returns `true` if the rejection carries a balance-insufficiency indicator.
    pub fn is_insufficient_balance(&self) -> bool {
        self.error_code
            .is_some_and(|code| code.is_insufficient_balance())
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// An inbound frame before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Canonical, validated room events.
///
/// Serializes to the same `{"event", "data"}` envelope the server sends, so a
/// `RoomEvent` can be fed back through the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RoomEvent {
    NumberCalled(NumberCalled),
    BingoClaimed(BingoClaimed),
    BingoClaimCountdown(BingoClaimCountdown),
    RoundFinished(RoundFinished),
    RoundCleanup(RoundCleanup),
    RoundTransitionCountdown(RoundTransitionCountdown),
    RoundStarted(RoundStarted),
    /// Boxed to reduce enum size.
    RoomStateSync(Box<RoomStateSync>),
    RoomPrizeUpdated(RoomPrizeUpdated),
    CardDetails(CardDetails),
    BingoValidated(BingoValidated),
    ClaimResult(ClaimResult),
}

/// Discriminant of a [`RoomEvent`], with its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NumberCalled,
    BingoClaimed,
    BingoClaimCountdown,
    RoundFinished,
    RoundCleanup,
    RoundTransitionCountdown,
    RoundStarted,
    RoomStateSync,
    RoomPrizeUpdated,
    CardDetails,
    BingoValidated,
    ClaimResult,
}

impl EventKind {
    /// Every kind the client understands.
    pub const ALL: [EventKind; 12] = [
        Self::NumberCalled,
        Self::BingoClaimed,
        Self::BingoClaimCountdown,
        Self::RoundFinished,
        Self::RoundCleanup,
        Self::RoundTransitionCountdown,
        Self::RoundStarted,
        Self::RoomStateSync,
        Self::RoomPrizeUpdated,
        Self::CardDetails,
        Self::BingoValidated,
        Self::ClaimResult,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NumberCalled => "number-called",
            Self::BingoClaimed => "bingo-claimed",
            Self::BingoClaimCountdown => "bingo-claim-countdown",
            Self::RoundFinished => "round-finished",
            Self::RoundCleanup => "round-cleanup",
            Self::RoundTransitionCountdown => "round-transition-countdown",
            Self::RoundStarted => "round-started",
            Self::RoomStateSync => "room-state-sync",
            Self::RoomPrizeUpdated => "room-prize-updated",
            Self::CardDetails => "card-details",
            Self::BingoValidated => "bingo-validated",
            Self::ClaimResult => "claim-result",
        }
    }

    /// Looks a kind up by wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RoomEvent {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NumberCalled(_) => EventKind::NumberCalled,
            Self::BingoClaimed(_) => EventKind::BingoClaimed,
            Self::BingoClaimCountdown(_) => EventKind::BingoClaimCountdown,
            Self::RoundFinished(_) => EventKind::RoundFinished,
            Self::RoundCleanup(_) => EventKind::RoundCleanup,
            Self::RoundTransitionCountdown(_) => EventKind::RoundTransitionCountdown,
            Self::RoundStarted(_) => EventKind::RoundStarted,
            Self::RoomStateSync(_) => EventKind::RoomStateSync,
            Self::RoomPrizeUpdated(_) => EventKind::RoomPrizeUpdated,
            Self::CardDetails(_) => EventKind::CardDetails,
            Self::BingoValidated(_) => EventKind::BingoValidated,
            Self::ClaimResult(_) => EventKind::ClaimResult,
        }
    }

    /// Room the event belongs to.
    pub fn room_id(&self) -> &str {
        match self {
            Self::NumberCalled(e) => &e.room_id,
            Self::BingoClaimed(e) => &e.room_id,
            Self::BingoClaimCountdown(e) => &e.room_id,
            Self::RoundFinished(e) => &e.room_id,
            Self::RoundCleanup(e) => &e.room_id,
            Self::RoundTransitionCountdown(e) => &e.room_id,
            Self::RoundStarted(e) => &e.room_id,
            Self::RoomStateSync(e) => &e.room_id,
            Self::RoomPrizeUpdated(e) => &e.room_id,
            Self::CardDetails(e) => &e.room_id,
            Self::BingoValidated(e) => &e.room_id,
            Self::ClaimResult(e) => &e.room_id,
        }
    }
}

/// Message types sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Open a room subscription.
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Close a room subscription.
    LeaveRoom { room_id: RoomId },
    /// Ask for an authoritative `room-state-sync` snapshot.
    RequestRoomState { room_id: RoomId },
    /// Claim bingo on one of the local player's cards.
    ClaimBingo {
        card_id: CardId,
        room_id: RoomId,
        round_number: u32,
    },
    /// Heartbeat to maintain connection.
    Ping,
}
