//! One room subscription.
//!
//! A [`RoomSession`] owns everything scoped to a single room subscription:
//! the [`RoundState`] store, the shared [`ClaimFlag`], the modal/notification
//! [`Orchestrator`], the room's winners, the local player's cards and the
//! latest prize info. Sessions are never reused across rooms; a room switch
//! disposes the old session and constructs a new one.
//!
//! The transport loop owns the session exclusively and publishes a
//! [`RoomView`] after every change.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::claim::ClaimFlag;
use crate::countdown::RoundTiming;
use crate::error::{BingoSyncError, Result};
use crate::error_codes::ErrorCode;
use crate::gate::{self, CardAccess, CardMode, GateContext};
use crate::modal::{
    Animations, ModalKind, ModalSet, Notification, NotificationKind, Orchestrator,
    DEFAULT_NOTIFICATION_DURATION,
};
use crate::number::NumberCode;
use crate::protocol::{
    BingoClaimed, BingoValidated, CardDetails, CardId, CardIndex, ClaimResult, ClientMessage,
    Pattern, RoomEvent, RoomId, RoomPrizeUpdated, RoomStateSync, UserId, Winner,
};
use crate::round::{Outcome, RoundPhase, RoundState, DEFAULT_LAST_NUMBERS_WINDOW};

/// Identifier of one room subscription's lifetime.
pub type SubscriptionId = Uuid;

/// Settings a session needs from the client configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// The local player's user id, used to recognize local winners.
    pub user_id: Option<UserId>,
    pub timing: RoundTiming,
    pub last_numbers_window: usize,
    pub notification_duration: Duration,
    /// Mark every called number on each local card that holds it.
    pub auto_mark: bool,
    /// Server clock minus local clock, in milliseconds.
    pub server_clock_offset_ms: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: None,
            timing: RoundTiming::default(),
            last_numbers_window: DEFAULT_LAST_NUMBERS_WINDOW,
            notification_duration: DEFAULT_NOTIFICATION_DURATION,
            auto_mark: false,
            server_clock_offset_ms: 0,
        }
    }
}

/// Side effects of a handled event that the client surfaces as events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The round number advanced and the claim flag was reset.
    RoundAdvanced { round_number: u32 },
    /// The claim window closed; validation UI was force-closed.
    ClaimWindowClosed,
    /// The room reached its terminal state.
    RoomFinished,
    /// The server accepted the local claim request.
    ClaimAccepted { card_id: CardId },
    /// The server refused the local claim request.
    ClaimRejected {
        card_id: CardId,
        /// Server message, verbatim.
        message: String,
        error_code: Option<ErrorCode>,
        insufficient_balance: bool,
    },
    /// The server validated one of the local player's bingos.
    BingoConfirmed { card_id: CardId },
    /// The server found one of the local player's bingos invalid.
    BingoRejected { card_id: CardId },
}

/// Result of [`RoomSession::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub outcome: Outcome,
    pub notices: Vec<SessionNotice>,
}

impl Handled {
    fn bare(outcome: Outcome) -> Self {
        Self {
            outcome,
            notices: Vec::new(),
        }
    }
}

/// State of one room subscription.
#[derive(Debug)]
pub struct RoomSession {
    id: SubscriptionId,
    room_id: RoomId,
    settings: SessionSettings,
    round: RoundState,
    claim: ClaimFlag,
    ui: Orchestrator,
    /// Every winner announced in the room, in announcement order.
    winners: Vec<Winner>,
    cards: BTreeMap<CardIndex, CardDetails>,
    prize: Option<RoomPrizeUpdated>,
}

impl RoomSession {
    /// Open a fresh subscription to `room_id`.
    pub fn new(room_id: impl Into<RoomId>, settings: SessionSettings) -> Self {
        let id = Uuid::new_v4();
        let room_id = room_id.into();
        debug!(%id, room_id = %room_id, "room session opened");
        Self {
            id,
            room_id,
            round: RoundState::new(settings.timing, settings.last_numbers_window),
            ui: Orchestrator::new(settings.notification_duration),
            settings,
            claim: ClaimFlag::default(),
            winners: Vec::new(),
            cards: BTreeMap::new(),
            prize: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    /// Another handle to this subscription's claim flag.
    pub fn claim_flag(&self) -> ClaimFlag {
        self.claim.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.ui
    }

    pub fn winners(&self) -> &[Winner] {
        &self.winners
    }

    pub fn cards(&self) -> &BTreeMap<CardIndex, CardDetails> {
        &self.cards
    }

    pub fn prize(&self) -> Option<&RoomPrizeUpdated> {
        self.prize.as_ref()
    }

    // ── Event handling ──────────────────────────────────────────────

    /// Route one normalized event through the store and its side effects.
    pub fn handle(&mut self, event: &RoomEvent, now: Instant) -> Handled {
        if event.room_id() != self.room_id && !event.room_id().is_empty() {
            warn!(
                kind = %event.kind(),
                event_room = event.room_id(),
                room_id = %self.room_id,
                "dropping event for another room"
            );
            return Handled::bare(Outcome::Ignored);
        }

        let round_before = self.round.round_number();
        let room_finished_before = self.round.room_finished();
        let outcome = self.round.apply(event, now);
        let mut handled = Handled::bare(outcome);

        let round_now = self.round.round_number();
        if round_now > round_before {
            // Covers implied round starts as well as explicit ones.
            self.ui.on_round_started();
            if self.claim.observe_round(round_now) {
                handled.notices.push(SessionNotice::RoundAdvanced {
                    round_number: round_now,
                });
            }
        }

        match event {
            RoomEvent::NumberCalled(e) if outcome.changed() => self.auto_mark(e.number),
            RoomEvent::BingoClaimed(e) => self.on_bingo_claimed(e, outcome),
            RoomEvent::BingoClaimCountdown(e) if e.seconds_remaining == 0 => {
                if outcome != Outcome::Stale {
                    self.ui.on_claim_window_closed();
                    handled.notices.push(SessionNotice::ClaimWindowClosed);
                }
            }
            RoomEvent::RoundFinished(_) if outcome.changed() => {
                let has_winners = !self.round.winning_numbers().is_empty();
                self.ui.on_round_finished(has_winners);
            }
            RoomEvent::RoundCleanup(_) if outcome.changed() => self.ui.on_round_cleanup(),
            RoomEvent::RoundStarted(_) if outcome.changed() => self.ui.on_round_started(),
            RoomEvent::RoomStateSync(sync) if outcome.changed() => self.on_sync(sync),
            RoomEvent::RoomPrizeUpdated(prize) => {
                handled.outcome = self.on_prize(prize);
            }
            RoomEvent::CardDetails(card) => {
                handled.outcome = self.on_card(card);
            }
            RoomEvent::BingoValidated(verdict) => {
                let (outcome, notice) = self.on_validated(verdict, now);
                handled.outcome = outcome;
                handled.notices.extend(notice);
            }
            RoomEvent::ClaimResult(result) => {
                let (outcome, notice) = self.on_claim_result(result, now);
                handled.outcome = outcome;
                handled.notices.extend(notice);
            }
            _ => {}
        }

        if self.round.room_finished() && !room_finished_before {
            info!(room_id = %self.room_id, round = self.round.round_number(), "room finished");
            handled.notices.push(SessionNotice::RoomFinished);
        }
        handled
    }

    fn auto_mark(&mut self, number: NumberCode) {
        if !self.settings.auto_mark {
            return;
        }
        let indices: Vec<CardIndex> = self
            .cards
            .iter()
            .filter(|(_, card)| card.contains(number))
            .map(|(index, _)| *index)
            .collect();
        for index in indices {
            self.round.mark(index, number);
        }
    }

    fn on_bingo_claimed(&mut self, event: &BingoClaimed, outcome: Outcome) {
        if matches!(outcome, Outcome::Stale | Outcome::Ignored) {
            return;
        }
        for winner in event.all_winners() {
            if !self.winners.iter().any(|w| w.card_id == winner.card_id) {
                self.winners.push(winner);
            }
        }
        if outcome.changed() {
            let local_winner = event.all_winners().iter().any(|w| self.is_local_winner(w));
            // Read the flag as of now: the claim may have been submitted
            // after this session started.
            let show_loser = gate::show_loser(self.user_has_bingo(), self.claim.has_claimed());
            self.ui.on_bingo_claimed(local_winner, show_loser);
        }
    }

    fn on_sync(&mut self, sync: &RoomStateSync) {
        self.winners.clear();
        for winner in &sync.winners {
            if !self.winners.iter().any(|w| w.card_id == winner.card_id) {
                self.winners.push(winner.clone());
            }
        }
        if !sync.cards.is_empty() {
            self.cards = sync
                .cards
                .iter()
                .map(|card| (card.card_index, card.clone()))
                .collect();
        }
        self.claim.restore(sync.round_number, sync.has_claimed);
        self.ui.on_round_started();
        if self.round.phase() == RoundPhase::ClaimWindow {
            self.ui.open(ModalKind::Validation);
        }
        self.ui.notifications_mut().dismiss(NotificationKind::SyncFailed);
    }

    fn on_prize(&mut self, prize: &RoomPrizeUpdated) -> Outcome {
        if self.prize.as_ref() == Some(prize) {
            return Outcome::Duplicate;
        }
        self.prize = Some(prize.clone());
        Outcome::Applied
    }

    fn on_card(&mut self, card: &CardDetails) -> Outcome {
        if self.cards.get(&card.card_index) == Some(card) {
            return Outcome::Duplicate;
        }
        self.cards.insert(card.card_index, card.clone());
        if self.settings.auto_mark && !self.round.is_transitioning() && !self.round.room_finished()
        {
            let called: Vec<NumberCode> = self
                .round
                .called_numbers()
                .iter()
                .copied()
                .filter(|n| card.contains(*n))
                .collect();
            for number in called {
                self.round.mark(card.card_index, number);
            }
        }
        Outcome::Applied
    }

    fn on_validated(
        &mut self,
        verdict: &BingoValidated,
        now: Instant,
    ) -> (Outcome, Option<SessionNotice>) {
        if verdict.round_number < self.round.round_number() {
            return (Outcome::Stale, None);
        }
        let local = self.settings.user_id.as_deref() == Some(verdict.user_id.as_str())
            || self.is_local_card(&verdict.card_id);
        if !local {
            return (Outcome::Ignored, None);
        }
        let card_id = verdict.card_id.clone();
        if verdict.is_valid {
            self.ui.on_bingo_confirmed(now);
            (Outcome::Applied, Some(SessionNotice::BingoConfirmed { card_id }))
        } else {
            self.ui.on_bingo_rejected(now);
            (Outcome::Applied, Some(SessionNotice::BingoRejected { card_id }))
        }
    }

    fn on_claim_result(
        &mut self,
        result: &ClaimResult,
        now: Instant,
    ) -> (Outcome, Option<SessionNotice>) {
        if result.round_number < self.round.round_number() {
            return (Outcome::Stale, None);
        }
        let card_id = result.card_id.clone();
        if result.success {
            return (Outcome::Applied, Some(SessionNotice::ClaimAccepted { card_id }));
        }
        // A refused claim still counts as this round's attempt.
        self.ui
            .notifications_mut()
            .issue(NotificationKind::ClaimRejected, result.message.clone(), now);
        let notice = SessionNotice::ClaimRejected {
            card_id,
            message: result.message.clone(),
            error_code: result.error_code,
            insufficient_balance: result.is_insufficient_balance(),
        };
        (Outcome::Applied, Some(notice))
    }

    fn is_local_card(&self, card_id: &str) -> bool {
        self.cards.values().any(|card| card.card_id == card_id)
    }

    fn is_local_winner(&self, winner: &Winner) -> bool {
        self.settings.user_id.as_deref() == Some(winner.user_id.as_str())
            || self.is_local_card(&winner.card_id)
    }

    /// Whether any local card has a bingo in the current round.
    pub fn user_has_bingo(&self) -> bool {
        self.winners.iter().any(|w| {
            self.is_local_winner(w) && self.round.winning_numbers_for(&w.card_id).is_some()
        })
    }

    // ── Player actions ──────────────────────────────────────────────

    pub fn gate(&self) -> GateContext {
        GateContext {
            room_finished: self.round.room_finished(),
            winner_count: self.winners.len(),
            has_claimed_this_round: self.claim.has_claimed(),
            is_transitioning: self.round.is_transitioning(),
        }
    }

    pub fn can_open(&self, card_index: CardIndex) -> CardAccess {
        self.gate().can_open(card_index)
    }

    pub fn show_loser(&self) -> bool {
        gate::show_loser(self.user_has_bingo(), self.claim.has_claimed())
    }

    /// Mark the local claim and build the claim request for one card.
    ///
    /// # Errors
    ///
    /// [`BingoSyncError::UnknownCard`] if no local card sits at `card_index`,
    /// [`BingoSyncError::Blocked`] if the gate does not allow editing it.
    pub fn claim(&self, card_index: CardIndex) -> Result<ClientMessage> {
        let card = self
            .cards
            .get(&card_index)
            .ok_or(BingoSyncError::UnknownCard(card_index))?;
        claim_request(
            &self.room_id,
            self.round.round_number(),
            card,
            self.gate(),
            &self.claim,
        )
    }

    /// Mark a called number on a local card.
    ///
    /// Returns `Ok(false)` if the number was already marked.
    ///
    /// # Errors
    ///
    /// Fails if the card is unknown, the gate blocks editing, the card does
    /// not hold the number, or the number has not been called.
    pub fn mark(&mut self, card_index: CardIndex, number: NumberCode) -> Result<bool> {
        let card = self
            .cards
            .get(&card_index)
            .ok_or(BingoSyncError::UnknownCard(card_index))?;
        ensure_editable(self.can_open(card_index))?;
        if !card.contains(number) || !self.round.is_called(number) {
            return Err(BingoSyncError::NotCalled(number));
        }
        Ok(self.round.mark(card_index, number))
    }

    /// Remove a mark. Returns `Ok(false)` if it was not marked.
    ///
    /// # Errors
    ///
    /// Fails if the card is unknown or the gate blocks editing.
    pub fn unmark(&mut self, card_index: CardIndex, number: NumberCode) -> Result<bool> {
        if !self.cards.contains_key(&card_index) {
            return Err(BingoSyncError::UnknownCard(card_index));
        }
        ensure_editable(self.can_open(card_index))?;
        Ok(self.round.unmark(card_index, number))
    }

    pub fn open_modal(&mut self, kind: ModalKind) {
        self.ui.open(kind);
    }

    pub fn close_modal(&mut self, kind: ModalKind) {
        self.ui.close(kind);
    }

    pub fn dismiss(&mut self, kind: NotificationKind) -> bool {
        self.ui.notifications_mut().dismiss(kind)
    }

    // ── Sync and timers ─────────────────────────────────────────────

    /// Show the persistent "could not synchronize" banner.
    pub fn on_sync_failed(&mut self, reason: &str, now: Instant) {
        self.ui
            .notifications_mut()
            .issue(NotificationKind::SyncFailed, reason, now);
    }

    /// Advance local timers. Returns notices for what the tick changed.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        if self.round.tick(now) {
            debug!(room_id = %self.room_id, "claim window deadline passed locally");
            self.ui.on_claim_window_closed();
            notices.push(SessionNotice::ClaimWindowClosed);
        }
        self.ui.tick(now);
        notices
    }

    /// Tear the subscription down before a new one replaces it.
    pub fn dispose(mut self) {
        self.ui.notifications_mut().clear();
        debug!(id = %self.id, room_id = %self.room_id, "room session disposed");
    }

    /// Snapshot the derived state for rendering.
    pub fn view(&self, now: Instant, synchronized: bool) -> RoomView {
        let round = &self.round;
        let winning_numbers = round.winning_numbers().clone();
        RoomView {
            subscription_id: self.id,
            room_id: self.room_id.clone(),
            synchronized,
            round_number: round.round_number(),
            phase: round.phase(),
            pattern: round.pattern(),
            called_numbers: round.called_numbers().clone(),
            last_numbers: round.last_numbers().collect(),
            current_number: round.current_number(),
            numbers_visible: round.numbers_visible(),
            round_finished: round.round_finished(),
            room_finished: round.room_finished(),
            is_transitioning: round.is_transitioning(),
            is_calling_number: round.is_calling_number(),
            claim_countdown_seconds: round.claim_countdown_seconds(now),
            transition_countdown_seconds: round.transition_countdown_seconds(now),
            transition_finish_local_ms: round
                .transition_finish_timestamp()
                .map(|ts| ts.saturating_sub(self.settings.server_clock_offset_ms)),
            marked_numbers: round.marked_numbers().clone(),
            winning_numbers,
            winners: self.winners.clone(),
            user_has_bingo: self.user_has_bingo(),
            cards: self.cards.clone(),
            prize: self.prize.clone(),
            modals: self.ui.modals(),
            animations: self.ui.animations(),
            notifications: self.ui.notifications().active().to_vec(),
            claim: self.claim.clone(),
        }
    }
}

pub(crate) fn ensure_editable(access: CardAccess) -> Result<()> {
    match (access.mode, access.reason) {
        (CardMode::OpenEditor, _) => Ok(()),
        (_, Some(reason)) => Err(BingoSyncError::Blocked(reason)),
        (_, None) => Err(BingoSyncError::Spectating),
    }
}

/// Mark the claim flag and build the `claim-bingo` request.
///
/// The flag is written before the request exists, so a `bingo-claimed`
/// handled between now and the server's reply already sees the claim.
pub(crate) fn claim_request(
    room_id: &str,
    round_number: u32,
    card: &CardDetails,
    gate: GateContext,
    flag: &ClaimFlag,
) -> Result<ClientMessage> {
    ensure_editable(gate.can_open(card.card_index))?;
    flag.mark_claimed();
    debug!(room_id, round = round_number, card_id = %card.card_id, "claiming bingo");
    Ok(ClientMessage::ClaimBingo {
        card_id: card.card_id.clone(),
        room_id: room_id.to_owned(),
        round_number,
    })
}

// ── RoomView ────────────────────────────────────────────────────────

/// Render-ready snapshot of one room subscription.
///
/// Everything is a copy except the claim flag, which stays live so that
/// [`RoomView::has_claimed_this_round`] is never stale.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub subscription_id: SubscriptionId,
    pub room_id: RoomId,
    /// The authoritative snapshot has landed since the last (re)connect.
    pub synchronized: bool,
    pub round_number: u32,
    pub phase: RoundPhase,
    pub pattern: Pattern,
    pub called_numbers: BTreeSet<NumberCode>,
    /// Most recent first.
    pub last_numbers: Vec<NumberCode>,
    pub current_number: Option<NumberCode>,
    pub numbers_visible: bool,
    pub round_finished: bool,
    pub room_finished: bool,
    pub is_transitioning: bool,
    pub is_calling_number: bool,
    pub claim_countdown_seconds: Option<u32>,
    pub transition_countdown_seconds: Option<u32>,
    /// Server transition deadline shifted onto the local clock (Unix ms).
    pub transition_finish_local_ms: Option<i64>,
    pub marked_numbers: BTreeMap<CardIndex, BTreeSet<NumberCode>>,
    pub winning_numbers: BTreeMap<CardId, BTreeSet<NumberCode>>,
    pub winners: Vec<Winner>,
    pub user_has_bingo: bool,
    pub cards: BTreeMap<CardIndex, CardDetails>,
    pub prize: Option<RoomPrizeUpdated>,
    pub modals: ModalSet,
    pub animations: Animations,
    pub notifications: Vec<Notification>,
    claim: ClaimFlag,
}

impl RoomView {
    /// Reads the live claim flag.
    pub fn has_claimed_this_round(&self) -> bool {
        self.claim.has_claimed()
    }

    pub(crate) fn claim_flag(&self) -> &ClaimFlag {
        &self.claim
    }

    pub fn gate(&self) -> GateContext {
        GateContext {
            room_finished: self.room_finished,
            winner_count: self.winners.len(),
            has_claimed_this_round: self.has_claimed_this_round(),
            is_transitioning: self.is_transitioning,
        }
    }

    pub fn can_open(&self, card_index: CardIndex) -> CardAccess {
        self.gate().can_open(card_index)
    }

    pub fn show_loser(&self) -> bool {
        gate::show_loser(self.user_has_bingo, self.has_claimed_this_round())
    }

    /// Winning numbers of one card; `None` for cards that did not win.
    pub fn winning_numbers_for(&self, card_id: &str) -> Option<&BTreeSet<NumberCode>> {
        self.winning_numbers.get(card_id)
    }

    pub fn card(&self, card_index: CardIndex) -> Option<&CardDetails> {
        self.cards.get(&card_index)
    }

    pub fn notification(&self, kind: NotificationKind) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.kind == kind)
    }
}
