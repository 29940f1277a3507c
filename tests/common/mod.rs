#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the bingo sync client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands out
//! transports in order, and builders for the server's room event frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bingo_sync_client::protocol::{
    BingoClaimCountdown, BingoClaimed, BingoValidated, CalledNumber, CardDetails, ClaimResult,
    CleanupType, NumberCalled, Pattern, RoomPrizeUpdated, RoomStateSync, RoomStatus,
    RoundCleanup, RoundFinished, RoundStarted, RoundTransitionCountdown, Winner,
};
use bingo_sync_client::{
    BingoEvent, BingoSyncError, ClientMessage, Connector, ErrorCode, NumberCode, RoomEvent,
    Transport,
};
use tokio::sync::mpsc;

pub const ROOM: &str = "room-1";

/// Sent frames, shared across every transport a connector hands out.
pub type SentLog = Arc<StdMutex<Vec<String>>>;

type Scripted = Option<Result<String, BingoSyncError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Scripted server frames are consumed in order by `recv()`. Once the script
/// runs out, `recv()` hangs so the loop stays alive until shutdown. All
/// messages sent by the client are recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Scripted>,
    pub sent: SentLog,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a mock transport with its own sent log and close flag.
    pub fn new(incoming: Vec<Scripted>) -> (Self, SentLog, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self::with_log(incoming, Arc::clone(&sent), Arc::clone(&closed));
        (transport, sent, closed)
    }

    /// Create a mock transport that records into an existing log.
    pub fn with_log(incoming: Vec<Scripted>, sent: SentLog, closed: Arc<AtomicBool>) -> Self {
        Self {
            incoming: VecDeque::from(incoming),
            sent,
            closed,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), BingoSyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, BingoSyncError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), BingoSyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out scripted connection attempts in order.
///
/// `None` entries fail the attempt. When the script runs out every further
/// attempt fails.
pub struct MockConnector {
    attempts: VecDeque<Option<MockTransport>>,
    pub connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(attempts: Vec<Option<MockTransport>>) -> (Self, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            attempts: VecDeque::from(attempts),
            connects: Arc::clone(&connects),
        };
        (connector, connects)
    }

    /// A connector with one transport playing `incoming`.
    pub fn single(incoming: Vec<Scripted>) -> (Self, SentLog, Arc<AtomicBool>) {
        let (transport, sent, closed) = MockTransport::new(incoming);
        let (connector, _) = Self::new(vec![Some(transport)]);
        (connector, sent, closed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, BingoSyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.attempts.pop_front() {
            Some(Some(transport)) => Ok(transport),
            Some(None) => Err(BingoSyncError::TransportReceive("connection refused".into())),
            None => Err(BingoSyncError::TransportClosed),
        }
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive events until one matches, failing after a second of silence.
pub async fn next_matching(
    events: &mut mpsc::Receiver<BingoEvent>,
    mut pred: impl FnMut(&BingoEvent) -> bool,
) -> BingoEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Decode every recorded outbound frame.
pub fn sent_messages(sent: &SentLog) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|json| serde_json::from_str(json).expect("client sent invalid JSON"))
        .collect()
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Frame builders ──────────────────────────────────────────────────

pub fn n(value: u8) -> NumberCode {
    NumberCode::from_ball(value).expect("ball in range")
}

pub fn frame(event: &RoomEvent) -> String {
    serde_json::to_string(event).expect("room event serialization")
}

pub fn winner(card_id: &str, user_id: &str, numbers: &[u8]) -> Winner {
    Winner {
        card_id: card_id.into(),
        card_code: card_id.to_uppercase(),
        user_id: user_id.into(),
        user_name: format!("player {user_id}"),
        is_first: true,
        bingo_numbers: numbers.iter().map(|v| n(*v)).collect(),
    }
}

pub fn card(index: usize, card_id: &str, values: &[u8]) -> CardDetails {
    CardDetails {
        room_id: ROOM.into(),
        card_id: card_id.into(),
        card_code: card_id.to_uppercase(),
        card_index: index,
        numbers: vec![values.to_vec()],
    }
}

pub fn number_called(round: u32, value: u8) -> RoomEvent {
    RoomEvent::NumberCalled(NumberCalled {
        room_id: ROOM.into(),
        round_number: round,
        number: n(value),
    })
}

pub fn bingo_claimed(round: u32, winner: Winner) -> RoomEvent {
    RoomEvent::BingoClaimed(BingoClaimed {
        room_id: ROOM.into(),
        round_number: round,
        winner: Some(winner),
        winners: vec![],
    })
}

pub fn claim_countdown(round: u32, seconds_remaining: u32) -> RoomEvent {
    RoomEvent::BingoClaimCountdown(BingoClaimCountdown {
        room_id: ROOM.into(),
        round_number: round,
        seconds_remaining,
    })
}

pub fn round_finished(round: u32) -> RoomEvent {
    RoomEvent::RoundFinished(RoundFinished {
        room_id: ROOM.into(),
        round_number: round,
    })
}

pub fn round_cleanup(previous: u32, next: Option<u32>) -> RoomEvent {
    RoomEvent::RoundCleanup(RoundCleanup {
        room_id: ROOM.into(),
        previous_round_number: previous,
        next_round_number: next,
        cleanup_type: if next.is_some() {
            CleanupType::NextRound
        } else {
            CleanupType::RoomFinished
        },
    })
}

pub fn transition_countdown(next_round: u32, seconds_remaining: u32) -> RoomEvent {
    RoomEvent::RoundTransitionCountdown(RoundTransitionCountdown {
        room_id: ROOM.into(),
        seconds_remaining,
        finish_timestamp: None,
        next_round_number: next_round,
        has_winner: true,
    })
}

pub fn round_started(round: u32, pattern: Pattern) -> RoomEvent {
    RoomEvent::RoundStarted(RoundStarted {
        room_id: ROOM.into(),
        round_number: round,
        pattern,
    })
}

/// An active-round snapshot with the given called numbers.
pub fn snapshot(round: u32, status: RoomStatus, called: &[u8]) -> RoomStateSync {
    RoomStateSync {
        room_id: ROOM.into(),
        round_number: round,
        called_numbers: called
            .iter()
            .map(|v| CalledNumber {
                number: n(*v),
                called_at: None,
            })
            .collect(),
        status,
        pattern: Some(Pattern::Horizontal),
        winners: vec![],
        has_claimed: None,
        claim_seconds_remaining: None,
        transition_seconds_remaining: None,
        marked_numbers: Default::default(),
        cards: vec![],
    }
}

pub fn sync_event(sync: RoomStateSync) -> RoomEvent {
    RoomEvent::RoomStateSync(Box::new(sync))
}

pub fn card_details(index: usize, card_id: &str, values: &[u8]) -> RoomEvent {
    RoomEvent::CardDetails(card(index, card_id, values))
}

pub fn prize(total: f64) -> RoomEvent {
    RoomEvent::RoomPrizeUpdated(RoomPrizeUpdated {
        room_id: ROOM.into(),
        total_prize: total,
        enrolled_cards_count: 12,
        rewards: vec![serde_json::json!({"position": 1, "amount": total})],
    })
}

pub fn claim_result(round: u32, card_id: &str, success: bool, message: &str) -> RoomEvent {
    RoomEvent::ClaimResult(ClaimResult {
        room_id: ROOM.into(),
        round_number: round,
        card_id: card_id.into(),
        success,
        message: message.into(),
        error_code: (!success).then_some(ErrorCode::InsufficientBalance),
    })
}

pub fn bingo_validated(round: u32, card_id: &str, user_id: &str, is_valid: bool) -> RoomEvent {
    RoomEvent::BingoValidated(BingoValidated {
        room_id: ROOM.into(),
        round_number: round,
        card_id: card_id.into(),
        user_id: user_id.into(),
        is_valid,
    })
}
