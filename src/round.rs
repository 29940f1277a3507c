//! The round state store.
//!
//! [`RoundState`] is the authoritative in-memory picture of one room's
//! current round. All server events go through the single transition
//! function [`RoundState::apply`], which is positional rather than
//! time-based:
//!
//! ```text
//! idle → active → claim_window → cleanup → transitioning → active (next round)
//!           └──────────────→ finished (last round, absorbing)
//! ```
//!
//! Every handler is idempotent against redelivery and rejects events whose
//! round number is lower than the store's. `round-cleanup` clears marks but
//! keeps the called numbers on screen; only `round-started` clears both.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::countdown::{Countdown, RoundTiming};
use crate::number::NumberCode;
use crate::protocol::{
    BingoClaimCountdown, BingoClaimed, CardId, CardIndex, CleanupType, NumberCalled, Pattern,
    RoomEvent, RoomStateSync, RoomStatus, RoundCleanup, RoundFinished, RoundStarted,
    RoundTransitionCountdown,
};

/// Default length of the most-recent-first display queue.
pub const DEFAULT_LAST_NUMBERS_WINDOW: usize = 5;

/// Coarse lifecycle position of the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundPhase {
    #[default]
    Idle,
    Active,
    ClaimWindow,
    Cleanup,
    Transitioning,
    Finished,
}

/// What [`RoundState::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event changed the state.
    Applied,
    /// The event was already applied; nothing changed.
    Duplicate,
    /// The event belongs to an older round (or an already superseded
    /// transition); nothing changed.
    Stale,
    /// The event does not concern the round store, or arrived in a phase
    /// where it has no effect.
    Ignored,
}

impl Outcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Authoritative state of the current round of one room.
#[derive(Debug, Clone)]
pub struct RoundState {
    round_number: u32,
    /// Round for which `round-started` (or an equivalent) was applied.
    started_round: Option<u32>,
    phase: RoundPhase,
    pattern: Pattern,

    called_numbers: BTreeSet<NumberCode>,
    last_numbers: VecDeque<NumberCode>,
    last_numbers_window: usize,
    current_number: Option<NumberCode>,

    round_finished: bool,
    room_finished: bool,
    is_transitioning: bool,
    is_calling_number: bool,
    call_started_at: Option<Instant>,

    claim_countdown: Option<Countdown>,
    transition_countdown: Option<Countdown>,
    transition_next_round: Option<u32>,
    transition_finish_timestamp: Option<i64>,

    marked_numbers: BTreeMap<CardIndex, BTreeSet<NumberCode>>,
    winning_numbers: BTreeMap<CardId, BTreeSet<NumberCode>>,

    timing: RoundTiming,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new(RoundTiming::default(), DEFAULT_LAST_NUMBERS_WINDOW)
    }
}

impl RoundState {
    /// Create an idle store.
    ///
    /// A zero `last_numbers_window` is clamped to 1.
    pub fn new(timing: RoundTiming, last_numbers_window: usize) -> Self {
        Self {
            round_number: 0,
            started_round: None,
            phase: RoundPhase::Idle,
            pattern: Pattern::default(),
            called_numbers: BTreeSet::new(),
            last_numbers: VecDeque::new(),
            last_numbers_window: last_numbers_window.max(1),
            current_number: None,
            round_finished: false,
            room_finished: false,
            is_transitioning: false,
            is_calling_number: false,
            call_started_at: None,
            claim_countdown: None,
            transition_countdown: None,
            transition_next_round: None,
            transition_finish_timestamp: None,
            marked_numbers: BTreeMap::new(),
            winning_numbers: BTreeMap::new(),
            timing,
        }
    }

    // ── Transition function ─────────────────────────────────────────

    /// Apply one normalized event at time `now`.
    pub fn apply(&mut self, event: &RoomEvent, now: Instant) -> Outcome {
        let outcome = match event {
            RoomEvent::NumberCalled(e) => self.on_number_called(e, now),
            RoomEvent::BingoClaimed(e) => self.on_bingo_claimed(e, now),
            RoomEvent::BingoClaimCountdown(e) => self.on_claim_countdown(e, now),
            RoomEvent::RoundFinished(e) => self.on_round_finished(e),
            RoomEvent::RoundCleanup(e) => self.on_round_cleanup(e, now),
            RoomEvent::RoundTransitionCountdown(e) => self.on_transition_countdown(e, now),
            RoomEvent::RoundStarted(e) => self.on_round_started(e, now),
            RoomEvent::RoomStateSync(e) => self.on_sync(e, now),
            RoomEvent::RoomPrizeUpdated(_)
            | RoomEvent::CardDetails(_)
            | RoomEvent::BingoValidated(_)
            | RoomEvent::ClaimResult(_) => Outcome::Ignored,
        };
        debug!(
            kind = %event.kind(),
            ?outcome,
            round = self.round_number,
            phase = ?self.phase,
            "round store transition"
        );
        outcome
    }

    /// Admit an event tagged with `round`: stale rounds are rejected and a
    /// newer round implies a `round-started` that was never delivered.
    fn admit(&mut self, round: u32, now: Instant) -> Option<Outcome> {
        if round < self.round_number {
            return Some(Outcome::Stale);
        }
        if round > self.round_number || self.started_round.is_none() {
            let pattern = self.pattern;
            self.start_round(round, pattern, now);
        }
        None
    }

    fn on_number_called(&mut self, e: &NumberCalled, now: Instant) -> Outcome {
        if let Some(outcome) = self.admit(e.round_number, now) {
            return outcome;
        }
        if self.is_transitioning {
            return Outcome::Stale;
        }
        if self.room_finished || self.round_finished {
            return Outcome::Ignored;
        }
        if self.called_numbers.contains(&e.number) {
            return Outcome::Duplicate;
        }
        self.called_numbers.insert(e.number);
        self.last_numbers.push_front(e.number);
        self.last_numbers.truncate(self.last_numbers_window);
        self.current_number = Some(e.number);
        self.is_calling_number = true;
        self.call_started_at = Some(now);
        if self.phase == RoundPhase::Idle {
            self.phase = RoundPhase::Active;
        }
        Outcome::Applied
    }

    fn on_bingo_claimed(&mut self, e: &BingoClaimed, now: Instant) -> Outcome {
        if let Some(outcome) = self.admit(e.round_number, now) {
            return outcome;
        }
        if self.is_transitioning || self.room_finished {
            return Outcome::Ignored;
        }
        let mut changed = false;
        for winner in e.all_winners() {
            let entry = self.winning_numbers.entry(winner.card_id).or_default();
            for number in winner.bingo_numbers {
                changed |= entry.insert(number);
            }
        }
        if self.claim_countdown.is_none() && self.phase != RoundPhase::ClaimWindow {
            self.claim_countdown = Some(Countdown::starting_at(now, self.timing.claim_window));
            self.clear_transition();
            self.phase = RoundPhase::ClaimWindow;
            self.is_calling_number = false;
            changed = true;
        }
        if changed {
            Outcome::Applied
        } else {
            Outcome::Duplicate
        }
    }

    fn on_claim_countdown(&mut self, e: &BingoClaimCountdown, now: Instant) -> Outcome {
        if let Some(outcome) = self.admit(e.round_number, now) {
            return outcome;
        }
        if self.is_transitioning || self.room_finished {
            return Outcome::Ignored;
        }
        if e.seconds_remaining == 0 {
            return match self.claim_countdown.take() {
                Some(_) => Outcome::Applied,
                None => Outcome::Duplicate,
            };
        }
        let next = Countdown::from_seconds(now, e.seconds_remaining);
        if self
            .claim_countdown
            .is_some_and(|current| current.agrees_with(&next, Duration::from_secs(1)))
        {
            return Outcome::Duplicate;
        }
        self.claim_countdown = Some(next);
        self.clear_transition();
        self.phase = RoundPhase::ClaimWindow;
        Outcome::Applied
    }

    fn on_round_finished(&mut self, e: &RoundFinished) -> Outcome {
        if e.round_number < self.round_number {
            return Outcome::Stale;
        }
        if e.round_number > self.round_number {
            // A finish for a round we never saw; wait for cleanup or a sync.
            return Outcome::Ignored;
        }
        if self.round_finished {
            return Outcome::Duplicate;
        }
        self.round_finished = true;
        self.is_calling_number = false;
        if self.pattern.is_final_round() {
            self.finish_room();
        }
        Outcome::Applied
    }

    fn on_round_cleanup(&mut self, e: &RoundCleanup, now: Instant) -> Outcome {
        if e.previous_round_number < self.round_number {
            return Outcome::Stale;
        }
        if let (Some(next), Some(started)) = (e.next_round_number, self.started_round) {
            if next <= started {
                return Outcome::Stale;
            }
        }
        let ends_room = e.cleanup_type == CleanupType::RoomFinished || e.next_round_number.is_none();
        if ends_room && self.room_finished && self.marked_numbers.is_empty() {
            return Outcome::Duplicate;
        }
        if !ends_room
            && self.is_transitioning
            && self.transition_next_round == e.next_round_number
            && self.marked_numbers.is_empty()
        {
            return Outcome::Duplicate;
        }

        if e.previous_round_number > self.round_number {
            // Cleanup of a round never seen; the board belongs to an older one.
            self.called_numbers.clear();
            self.last_numbers.clear();
            self.current_number = None;
            self.winning_numbers.clear();
            self.round_number = e.previous_round_number;
            self.started_round = Some(e.previous_round_number);
        }
        self.marked_numbers.clear();
        self.claim_countdown = None;
        self.round_finished = true;
        self.is_calling_number = false;

        if ends_room {
            self.finish_room();
        } else {
            self.is_transitioning = true;
            self.transition_next_round = e.next_round_number;
            self.transition_finish_timestamp = None;
            self.transition_countdown =
                Some(Countdown::starting_at(now, self.timing.transition));
            self.phase = RoundPhase::Cleanup;
        }
        Outcome::Applied
    }

    fn on_transition_countdown(&mut self, e: &RoundTransitionCountdown, now: Instant) -> Outcome {
        if e.next_round_number <= self.round_number
            || self.started_round.is_some_and(|started| e.next_round_number <= started)
        {
            return Outcome::Stale;
        }
        // Ticks that outrun their cleanup are dropped; cleanup opens the window.
        if self.room_finished || !self.is_transitioning {
            return Outcome::Ignored;
        }
        let next = Countdown::from_seconds(now, e.seconds_remaining);
        if self.transition_countdown == Some(next)
            && self.transition_finish_timestamp == e.finish_timestamp
        {
            return Outcome::Duplicate;
        }
        self.claim_countdown = None;
        self.transition_countdown = Some(next);
        self.transition_next_round = Some(e.next_round_number);
        self.transition_finish_timestamp = e.finish_timestamp;
        self.phase = RoundPhase::Transitioning;
        Outcome::Applied
    }

    fn clear_transition(&mut self) {
        self.transition_countdown = None;
        self.transition_next_round = None;
        self.transition_finish_timestamp = None;
    }

    fn on_round_started(&mut self, e: &RoundStarted, now: Instant) -> Outcome {
        if e.round_number < self.round_number {
            return Outcome::Stale;
        }
        if self.started_round == Some(e.round_number) {
            return Outcome::Duplicate;
        }
        self.start_round(e.round_number, e.pattern, now);
        Outcome::Applied
    }

    fn on_sync(&mut self, sync: &RoomStateSync, now: Instant) -> Outcome {
        if sync.round_number < self.round_number {
            return Outcome::Stale;
        }
        *self = Self::from_snapshot(sync, self.timing, self.last_numbers_window, now);
        Outcome::Applied
    }

    /// Build a store from an authoritative snapshot, replacing every field.
    pub fn from_snapshot(
        sync: &RoomStateSync,
        timing: RoundTiming,
        last_numbers_window: usize,
        now: Instant,
    ) -> Self {
        let mut state = Self::new(timing, last_numbers_window);
        state.round_number = sync.round_number;
        state.pattern = sync.pattern.unwrap_or_default();

        let mut ordered = sync.called_numbers.clone();
        if ordered.iter().all(|n| n.called_at.is_some()) {
            ordered.sort_by(|a, b| a.called_at.cmp(&b.called_at));
        }
        for entry in &ordered {
            if state.called_numbers.insert(entry.number) {
                state.last_numbers.push_front(entry.number);
            }
        }
        state.last_numbers.truncate(state.last_numbers_window);
        state.current_number = state.last_numbers.front().copied();

        for winner in &sync.winners {
            state
                .winning_numbers
                .entry(winner.card_id.clone())
                .or_default()
                .extend(winner.bingo_numbers.iter().copied());
        }

        let status = match sync.status {
            RoomStatus::Unknown if state.called_numbers.is_empty() => RoomStatus::Waiting,
            RoomStatus::Unknown => RoomStatus::Active,
            other => other,
        };
        if status != RoomStatus::Waiting {
            state.started_round = Some(sync.round_number);
        }
        match status {
            RoomStatus::Waiting => state.phase = RoundPhase::Idle,
            RoomStatus::Active | RoomStatus::Unknown => {
                state.phase = RoundPhase::Active;
                state.is_calling_number = true;
            }
            RoomStatus::ClaimWindow => {
                state.phase = RoundPhase::ClaimWindow;
                state.claim_countdown = Some(match sync.claim_seconds_remaining {
                    Some(secs) => Countdown::from_seconds(now, secs),
                    None => Countdown::starting_at(now, timing.claim_window),
                });
            }
            RoomStatus::Transitioning => {
                state.phase = RoundPhase::Transitioning;
                state.is_transitioning = true;
                state.round_finished = true;
                state.transition_next_round = sync.round_number.checked_add(1);
                state.transition_countdown = sync
                    .transition_seconds_remaining
                    .map(|secs| Countdown::from_seconds(now, secs));
            }
            RoomStatus::Finished => {
                state.round_finished = true;
                state.finish_room();
            }
        }

        // Marks never survive into a cleanup.
        if !state.is_transitioning && !state.room_finished {
            for (index, numbers) in &sync.marked_numbers {
                let marks: BTreeSet<NumberCode> = numbers
                    .iter()
                    .copied()
                    .filter(|n| state.called_numbers.contains(n))
                    .collect();
                if !marks.is_empty() {
                    state.marked_numbers.insert(*index, marks);
                }
            }
        }
        state
    }

    fn start_round(&mut self, round: u32, pattern: Pattern, now: Instant) {
        self.round_number = round;
        self.started_round = Some(round);
        self.phase = RoundPhase::Active;
        self.pattern = pattern;
        self.called_numbers.clear();
        self.last_numbers.clear();
        self.current_number = None;
        self.marked_numbers.clear();
        self.winning_numbers.clear();
        self.round_finished = false;
        self.room_finished = false;
        self.is_transitioning = false;
        self.is_calling_number = true;
        self.call_started_at = Some(now);
        self.claim_countdown = None;
        self.transition_countdown = None;
        self.transition_next_round = None;
        self.transition_finish_timestamp = None;
    }

    /// Called numbers are kept when the room finishes; no later round
    /// supersedes them.
    fn finish_room(&mut self) {
        self.room_finished = true;
        self.is_transitioning = false;
        self.is_calling_number = false;
        self.claim_countdown = None;
        self.transition_countdown = None;
        self.transition_next_round = None;
        self.phase = RoundPhase::Finished;
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Expire the claim window once its local deadline has passed.
    ///
    /// Returns `true` if the window closed on this tick, which warrants the
    /// same safety net as a zero `bingo-claim-countdown`.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.claim_countdown {
            Some(countdown) if countdown.is_expired(now) => {
                self.claim_countdown = None;
                true
            }
            _ => false,
        }
    }

    // ── Marking ─────────────────────────────────────────────────────

    /// Mark `number` on the card at `index`. Only called numbers can be
    /// marked. Returns `true` if the mark is new.
    pub fn mark(&mut self, index: CardIndex, number: NumberCode) -> bool {
        if !self.called_numbers.contains(&number) {
            return false;
        }
        self.marked_numbers.entry(index).or_default().insert(number)
    }

    /// Remove a mark. Returns `true` if it was present.
    pub fn unmark(&mut self, index: CardIndex, number: NumberCode) -> bool {
        let Some(marks) = self.marked_numbers.get_mut(&index) else {
            return false;
        };
        let removed = marks.remove(&number);
        if marks.is_empty() {
            self.marked_numbers.remove(&index);
        }
        removed
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn called_numbers(&self) -> &BTreeSet<NumberCode> {
        &self.called_numbers
    }

    pub fn is_called(&self, number: NumberCode) -> bool {
        self.called_numbers.contains(&number)
    }

    /// Most recent first, bounded by the display window.
    pub fn last_numbers(&self) -> impl Iterator<Item = NumberCode> + '_ {
        self.last_numbers.iter().copied()
    }

    pub fn current_number(&self) -> Option<NumberCode> {
        self.current_number
    }

    pub fn round_finished(&self) -> bool {
        self.round_finished
    }

    pub fn room_finished(&self) -> bool {
        self.room_finished
    }

    pub fn is_transitioning(&self) -> bool {
        self.is_transitioning
    }

    pub fn is_calling_number(&self) -> bool {
        self.is_calling_number
    }

    /// Fraction of `interval` elapsed since the last call, for progress bars.
    pub fn call_progress(&self, now: Instant, interval: Duration) -> f32 {
        match self.call_started_at {
            Some(started) if self.is_calling_number && !interval.is_zero() => {
                let elapsed = now.saturating_duration_since(started).as_secs_f32();
                (elapsed / interval.as_secs_f32()).min(1.0)
            }
            _ => 0.0,
        }
    }

    pub fn claim_countdown_seconds(&self, now: Instant) -> Option<u32> {
        self.claim_countdown.map(|c| c.remaining_seconds(now))
    }

    pub fn transition_countdown_seconds(&self, now: Instant) -> Option<u32> {
        self.transition_countdown.map(|c| c.remaining_seconds(now))
    }

    pub fn transition_next_round(&self) -> Option<u32> {
        self.transition_next_round
    }

    /// Server deadline of the transition countdown in Unix milliseconds.
    pub fn transition_finish_timestamp(&self) -> Option<i64> {
        self.transition_finish_timestamp
    }

    pub fn marked_numbers(&self) -> &BTreeMap<CardIndex, BTreeSet<NumberCode>> {
        &self.marked_numbers
    }

    pub fn marked_on(&self, index: CardIndex) -> Option<&BTreeSet<NumberCode>> {
        self.marked_numbers.get(&index)
    }

    pub fn winning_numbers(&self) -> &BTreeMap<CardId, BTreeSet<NumberCode>> {
        &self.winning_numbers
    }

    /// Winning numbers of one card; empty for cards that did not win.
    pub fn winning_numbers_for(&self, card_id: &str) -> Option<&BTreeSet<NumberCode>> {
        self.winning_numbers.get(card_id)
    }

    pub fn timing(&self) -> RoundTiming {
        self.timing
    }

    /// Numbers stay on the board from the first call until the next round
    /// starts.
    pub fn numbers_visible(&self) -> bool {
        !self.called_numbers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::protocol::{CalledNumber, Winner};
    use std::time::Duration;

    const ROOM: &str = "room-1";

    fn n(value: u8) -> NumberCode {
        NumberCode::from_ball(value).unwrap()
    }

    fn started(round: u32, pattern: Pattern) -> RoomEvent {
        RoomEvent::RoundStarted(RoundStarted {
            room_id: ROOM.into(),
            round_number: round,
            pattern,
        })
    }

    fn called(round: u32, value: u8) -> RoomEvent {
        RoomEvent::NumberCalled(NumberCalled {
            room_id: ROOM.into(),
            round_number: round,
            number: n(value),
        })
    }

    fn cleanup(previous: u32, next: Option<u32>) -> RoomEvent {
        RoomEvent::RoundCleanup(RoundCleanup {
            room_id: ROOM.into(),
            previous_round_number: previous,
            next_round_number: next,
            cleanup_type: CleanupType::NextRound,
        })
    }

    fn claim_countdown(round: u32, seconds: u32) -> RoomEvent {
        RoomEvent::BingoClaimCountdown(BingoClaimCountdown {
            room_id: ROOM.into(),
            round_number: round,
            seconds_remaining: seconds,
        })
    }

    fn claimed(round: u32, card_id: &str, numbers: &[u8]) -> RoomEvent {
        RoomEvent::BingoClaimed(BingoClaimed {
            room_id: ROOM.into(),
            round_number: round,
            winner: Some(Winner {
                card_id: card_id.into(),
                card_code: card_id.to_uppercase(),
                user_id: "u1".into(),
                user_name: "Ana".into(),
                is_first: true,
                bingo_numbers: numbers.iter().map(|v| n(*v)).collect(),
            }),
            winners: vec![],
        })
    }

    fn active_round(round: u32, numbers: &[u8]) -> (RoundState, Instant) {
        let now = Instant::now();
        let mut state = RoundState::default();
        state.apply(&started(round, Pattern::Horizontal), now);
        for v in numbers {
            state.apply(&called(round, *v), now);
        }
        (state, now)
    }

    #[test]
    fn number_called_appends_most_recent_first() {
        let (state, _) = active_round(1, &[3, 20, 40]);
        assert_eq!(state.called_numbers().len(), 3);
        let last: Vec<_> = state.last_numbers().collect();
        assert_eq!(last, vec![n(40), n(20), n(3)]);
        assert_eq!(state.current_number(), Some(n(40)));
        assert_eq!(state.phase(), RoundPhase::Active);
    }

    #[test]
    fn last_numbers_window_is_bounded() {
        let now = Instant::now();
        let mut state = RoundState::new(RoundTiming::default(), 2);
        state.apply(&started(1, Pattern::Vertical), now);
        for v in [1, 2, 3, 4] {
            state.apply(&called(1, v), now);
        }
        let last: Vec<_> = state.last_numbers().collect();
        assert_eq!(last, vec![n(4), n(3)]);
        assert_eq!(state.called_numbers().len(), 4);
    }

    #[test]
    fn duplicate_number_is_not_appended_twice() {
        let (mut state, now) = active_round(1, &[7]);
        assert_eq!(state.apply(&called(1, 7), now), Outcome::Duplicate);
        assert_eq!(state.last_numbers().count(), 1);
    }

    #[test]
    fn newer_round_number_implies_round_start() {
        let (mut state, now) = active_round(1, &[7, 8]);
        state.mark(0, n(7));
        assert_eq!(state.apply(&called(2, 9), now), Outcome::Applied);
        assert_eq!(state.round_number(), 2);
        assert_eq!(state.called_numbers().len(), 1);
        assert!(state.marked_numbers().is_empty());
    }

    #[test]
    fn bingo_claimed_opens_one_claim_window() {
        let (mut state, now) = active_round(1, &[1, 2]);
        assert_eq!(state.apply(&claimed(1, "card-1", &[1]), now), Outcome::Applied);
        assert_eq!(state.phase(), RoundPhase::ClaimWindow);
        assert_eq!(state.claim_countdown_seconds(now), Some(45));

        // A redelivery ten seconds later must not restart the window.
        let later = now + Duration::from_secs(10);
        assert_eq!(state.apply(&claimed(1, "card-1", &[1]), later), Outcome::Duplicate);
        assert_eq!(state.claim_countdown_seconds(later), Some(35));
    }

    #[test]
    fn claim_countdown_sets_and_clears() {
        let (mut state, now) = active_round(1, &[1]);
        state.apply(&claimed(1, "card-1", &[1]), now);
        state.apply(&claim_countdown(1, 12), now);
        assert_eq!(state.claim_countdown_seconds(now), Some(12));
        assert_eq!(state.apply(&claim_countdown(1, 0), now), Outcome::Applied);
        assert_eq!(state.claim_countdown_seconds(now), None);
        assert_eq!(state.apply(&claim_countdown(1, 0), now), Outcome::Duplicate);
    }

    #[test]
    fn round_finished_preserves_numbers_and_marks() {
        let (mut state, now) = active_round(1, &[1, 2]);
        state.mark(0, n(1));
        let finished = RoomEvent::RoundFinished(RoundFinished {
            room_id: ROOM.into(),
            round_number: 1,
        });
        assert_eq!(state.apply(&finished, now), Outcome::Applied);
        assert!(state.round_finished());
        assert_eq!(state.called_numbers().len(), 2);
        assert_eq!(state.marked_on(0).map(BTreeSet::len), Some(1));
        assert_eq!(state.apply(&finished, now), Outcome::Duplicate);
    }

    #[test]
    fn cleanup_clears_marks_but_keeps_called_numbers() {
        let (mut state, now) = active_round(1, &[1, 2]);
        state.apply(&claimed(1, "card-1", &[1]), now);
        state.mark(0, n(1));
        assert_eq!(state.apply(&cleanup(1, Some(2)), now), Outcome::Applied);
        assert!(state.marked_numbers().is_empty());
        assert_eq!(state.called_numbers().len(), 2);
        assert!(state.is_transitioning());
        assert_eq!(state.phase(), RoundPhase::Cleanup);
        assert_eq!(state.claim_countdown_seconds(now), None);
        assert_eq!(state.transition_countdown_seconds(now), Some(20));
        assert_eq!(state.apply(&cleanup(1, Some(2)), now), Outcome::Duplicate);
    }

    #[test]
    fn marking_is_blocked_for_uncalled_numbers() {
        let (mut state, _) = active_round(1, &[5]);
        assert!(!state.mark(0, n(6)));
        assert!(state.mark(0, n(5)));
        assert!(!state.mark(0, n(5)));
        assert!(state.unmark(0, n(5)));
        assert!(state.marked_numbers().is_empty());
    }

    #[test]
    fn round_started_twice_equals_once() {
        let (mut state, now) = active_round(1, &[5]);
        state.apply(&cleanup(1, Some(2)), now);
        state.apply(&started(2, Pattern::Diagonal), now);
        state.apply(&called(2, 33), now);
        let before = format!("{state:?}");
        assert_eq!(state.apply(&started(2, Pattern::Diagonal), now), Outcome::Duplicate);
        assert_eq!(format!("{state:?}"), before);
    }

    #[test]
    fn stale_events_change_nothing() {
        let (mut state, now) = active_round(3, &[10, 11]);
        let before = format!("{state:?}");
        let stale = [
            called(2, 12),
            started(2, Pattern::Horizontal),
            claimed(2, "card-9", &[12]),
            claim_countdown(2, 0),
            cleanup(2, Some(3)),
            RoomEvent::RoundFinished(RoundFinished {
                room_id: ROOM.into(),
                round_number: 2,
            }),
            RoomEvent::RoundTransitionCountdown(RoundTransitionCountdown {
                room_id: ROOM.into(),
                seconds_remaining: 5,
                finish_timestamp: None,
                next_round_number: 3,
                has_winner: true,
            }),
        ];
        for event in &stale {
            assert_eq!(state.apply(event, now), Outcome::Stale, "{:?}", event.kind());
        }
        assert_eq!(format!("{state:?}"), before);
    }

    #[test]
    fn late_transition_tick_cannot_revive_countdown() {
        let (mut state, now) = active_round(1, &[5]);
        state.apply(&cleanup(1, Some(2)), now);
        state.apply(&started(2, Pattern::Horizontal), now);
        let late = RoomEvent::RoundTransitionCountdown(RoundTransitionCountdown {
            room_id: ROOM.into(),
            seconds_remaining: 3,
            finish_timestamp: Some(1_000),
            next_round_number: 2,
            has_winner: false,
        });
        assert_eq!(state.apply(&late, now), Outcome::Stale);
        assert_eq!(state.transition_countdown_seconds(now), None);
    }

    #[test]
    fn transition_countdown_reanchors_deadline() {
        let (mut state, now) = active_round(1, &[5]);
        state.apply(&cleanup(1, Some(2)), now);
        let tick = RoomEvent::RoundTransitionCountdown(RoundTransitionCountdown {
            room_id: ROOM.into(),
            seconds_remaining: 7,
            finish_timestamp: Some(99),
            next_round_number: 2,
            has_winner: true,
        });
        assert_eq!(state.apply(&tick, now), Outcome::Applied);
        assert_eq!(state.transition_countdown_seconds(now), Some(7));
        assert_eq!(state.phase(), RoundPhase::Transitioning);
        assert_eq!(state.transition_finish_timestamp(), Some(99));
        assert!(state.called_numbers().contains(&n(5)));
    }

    #[test]
    fn final_round_finish_is_absorbing_and_keeps_numbers() {
        let now = Instant::now();
        let mut state = RoundState::default();
        state.apply(&started(4, Pattern::Full), now);
        state.apply(&called(4, 70), now);
        state.apply(
            &RoomEvent::RoundFinished(RoundFinished {
                room_id: ROOM.into(),
                round_number: 4,
            }),
            now,
        );
        assert!(state.room_finished());
        assert_eq!(state.phase(), RoundPhase::Finished);
        assert!(state.numbers_visible());
        assert_eq!(state.apply(&called(4, 71), now), Outcome::Ignored);
    }

    #[test]
    fn room_finished_cleanup_has_no_transition() {
        let (mut state, now) = active_round(2, &[5]);
        let event = RoomEvent::RoundCleanup(RoundCleanup {
            room_id: ROOM.into(),
            previous_round_number: 2,
            next_round_number: None,
            cleanup_type: CleanupType::RoomFinished,
        });
        assert_eq!(state.apply(&event, now), Outcome::Applied);
        assert!(state.room_finished());
        assert!(!state.is_transitioning());
        assert_eq!(state.transition_countdown_seconds(now), None);
    }

    #[test]
    fn countdowns_are_never_both_open() {
        let (mut state, now) = active_round(1, &[5]);
        state.apply(&claimed(1, "card-1", &[5]), now);
        state.apply(&cleanup(1, Some(2)), now);
        assert!(state.claim_countdown_seconds(now).is_none());
        assert!(state.transition_countdown_seconds(now).is_some());
        // A claim tick that arrives after cleanup is not reapplied.
        assert_eq!(state.apply(&claim_countdown(1, 30), now), Outcome::Ignored);
        assert!(state.claim_countdown_seconds(now).is_none());
    }

    #[test]
    fn transition_tick_ahead_of_cleanup_cannot_overlap_a_claim() {
        let (mut state, now) = active_round(1, &[5]);
        let early = RoomEvent::RoundTransitionCountdown(RoundTransitionCountdown {
            room_id: ROOM.into(),
            seconds_remaining: 18,
            finish_timestamp: None,
            next_round_number: 2,
            has_winner: true,
        });
        assert_eq!(state.apply(&early, now), Outcome::Ignored);
        assert_eq!(state.apply(&claimed(1, "card-1", &[5]), now), Outcome::Applied);
        assert_eq!(state.claim_countdown_seconds(now), Some(45));
        assert_eq!(state.transition_countdown_seconds(now), None);
        assert_eq!(state.transition_next_round(), None);
    }

    #[test]
    fn redelivered_claim_tick_does_not_extend_the_window() {
        let (mut state, now) = active_round(1, &[5]);
        assert_eq!(state.apply(&claim_countdown(1, 30), now), Outcome::Applied);
        let later = now + Duration::from_millis(400);
        assert_eq!(state.apply(&claim_countdown(1, 30), later), Outcome::Duplicate);
        assert_eq!(state.claim_countdown_seconds(now), Some(30));
        // A tick that really moved the deadline is applied.
        assert_eq!(state.apply(&claim_countdown(1, 10), later), Outcome::Applied);
        assert_eq!(state.claim_countdown_seconds(later), Some(10));
    }

    #[test]
    fn winning_numbers_are_keyed_by_card() {
        let (mut state, now) = active_round(1, &[1, 2, 3, 4]);
        let batch = RoomEvent::BingoClaimed(BingoClaimed {
            room_id: ROOM.into(),
            round_number: 1,
            winner: None,
            winners: vec![
                Winner {
                    card_id: "card-1".into(),
                    card_code: "A".into(),
                    user_id: "u1".into(),
                    user_name: "Ana".into(),
                    is_first: true,
                    bingo_numbers: [n(1), n(2)].into_iter().collect(),
                },
                Winner {
                    card_id: "card-2".into(),
                    card_code: "B".into(),
                    user_id: "u2".into(),
                    user_name: "Ben".into(),
                    is_first: false,
                    bingo_numbers: [n(3), n(4)].into_iter().collect(),
                },
            ],
        });
        state.apply(&batch, now);
        let two = state.winning_numbers_for("card-2").unwrap();
        assert!(two.contains(&n(3)) && two.contains(&n(4)));
        assert!(!two.contains(&n(1)) && !two.contains(&n(2)));
        assert!(state.winning_numbers_for("card-3").is_none());
    }

    #[test]
    fn tick_expires_claim_window_from_deadline() {
        let (mut state, now) = active_round(1, &[1]);
        state.apply(&claimed(1, "card-1", &[1]), now);
        assert!(!state.tick(now + Duration::from_secs(44)));
        assert!(state.tick(now + Duration::from_secs(45)));
        assert!(state.claim_countdown_seconds(now).is_none());
    }

    #[test]
    fn snapshot_replaces_state_wholesale() {
        let (mut state, now) = active_round(2, &[1, 2, 3]);
        state.mark(0, n(1));
        let sync = RoomStateSync {
            room_id: ROOM.into(),
            round_number: 3,
            called_numbers: vec![
                CalledNumber {
                    number: n(50),
                    called_at: Some("2026-01-01T00:00:02Z".into()),
                },
                CalledNumber {
                    number: n(9),
                    called_at: Some("2026-01-01T00:00:01Z".into()),
                },
            ],
            status: RoomStatus::Active,
            pattern: Some(Pattern::CrossSmall),
            winners: vec![],
            has_claimed: None,
            claim_seconds_remaining: None,
            transition_seconds_remaining: None,
            marked_numbers: [(1, vec![n(9), n(10)])].into_iter().collect(),
            cards: vec![],
        };
        let event = RoomEvent::RoomStateSync(Box::new(sync));
        assert_eq!(state.apply(&event, now), Outcome::Applied);
        assert_eq!(state.round_number(), 3);
        assert_eq!(state.pattern(), Pattern::CrossSmall);
        assert_eq!(state.current_number(), Some(n(50)));
        assert!(!state.is_called(n(1)));
        assert!(state.marked_on(0).is_none());
        // Only called numbers survive as marks.
        assert_eq!(state.marked_on(1).map(BTreeSet::len), Some(1));
        // The synced round counts as started.
        assert_eq!(state.apply(&started(3, Pattern::CrossSmall), now), Outcome::Duplicate);
    }

    #[test]
    fn transitioning_snapshot_drops_marks_and_keeps_numbers() {
        let now = Instant::now();
        let sync = RoomStateSync {
            room_id: ROOM.into(),
            round_number: 1,
            called_numbers: vec![CalledNumber {
                number: n(4),
                called_at: None,
            }],
            status: RoomStatus::Transitioning,
            pattern: None,
            winners: vec![],
            has_claimed: Some(true),
            claim_seconds_remaining: None,
            transition_seconds_remaining: Some(11),
            marked_numbers: [(0, vec![n(4)])].into_iter().collect(),
            cards: vec![],
        };
        let state = RoundState::from_snapshot(&sync, RoundTiming::default(), 5, now);
        assert!(state.is_transitioning());
        assert!(state.numbers_visible());
        assert!(state.marked_numbers().is_empty());
        assert_eq!(state.transition_countdown_seconds(now), Some(11));
        assert_eq!(state.transition_next_round(), Some(2));
    }
}
