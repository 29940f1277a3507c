//! Reconnection synchronizer.
//!
//! After every (re)connect and every room switch the client asks for one
//! authoritative `room-state-sync`. Until it lands, round events are
//! buffered and then thrown away: the snapshot covers the whole gap, so
//! nothing seen during it is merged on top. Events that a snapshot does not
//! carry (card details, prize updates, claim replies and verdicts) pass
//! straight through.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::protocol::{ClientMessage, EventKind, RoomEvent};

/// Default time to wait for the snapshot before retrying.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Events buffered beyond this are dropped on arrival.
const MAX_BUFFERED_EVENTS: usize = 1024;

/// What to do with an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Apply it now.
    Apply(RoomEvent),
    /// Held until the snapshot lands, then discarded.
    Buffered,
    /// The awaited snapshot. `discarded` buffered events were dropped.
    Snapshot { event: RoomEvent, discarded: usize },
}

#[derive(Debug, Clone)]
enum Phase {
    Live,
    Awaiting {
        requested_at: Instant,
        attempts: u32,
        buffered: Vec<RoomEvent>,
    },
}

/// Tracks whether the current subscription has been synchronized.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    phase: Phase,
    timeout: Duration,
}

impl Synchronizer {
    /// Start out waiting for a snapshot requested at `now`.
    pub fn awaiting(timeout: Duration, now: Instant) -> Self {
        Self {
            phase: Phase::Awaiting {
                requested_at: now,
                attempts: 1,
                buffered: Vec::new(),
            },
            timeout,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live)
    }

    /// Number of requests sent for the pending snapshot; 0 when live.
    pub fn attempts(&self) -> u32 {
        match self.phase {
            Phase::Live => 0,
            Phase::Awaiting { attempts, .. } => attempts,
        }
    }

    /// Forget any sync in progress and wait for a new snapshot.
    ///
    /// Returns the request to send.
    pub fn restart(&mut self, room_id: &str, now: Instant) -> ClientMessage {
        if let Phase::Awaiting { buffered, .. } = &self.phase {
            if !buffered.is_empty() {
                debug!(count = buffered.len(), "dropping events buffered before restart");
            }
        }
        self.phase = Phase::Awaiting {
            requested_at: now,
            attempts: 1,
            buffered: Vec::new(),
        };
        request(room_id)
    }

    /// Decide what happens to `event`.
    pub fn admit(&mut self, event: RoomEvent) -> Admission {
        let Phase::Awaiting { buffered, .. } = &mut self.phase else {
            return Admission::Apply(event);
        };
        match event.kind() {
            EventKind::RoomStateSync => {
                let discarded = buffered.len();
                if discarded > 0 {
                    debug!(discarded, "snapshot landed; discarding buffered events");
                }
                self.phase = Phase::Live;
                Admission::Snapshot { event, discarded }
            }
            EventKind::CardDetails
            | EventKind::RoomPrizeUpdated
            | EventKind::ClaimResult
            | EventKind::BingoValidated => Admission::Apply(event),
            kind => {
                if buffered.len() >= MAX_BUFFERED_EVENTS {
                    warn!(%kind, "sync buffer full, dropping event");
                } else {
                    buffered.push(event);
                }
                Admission::Buffered
            }
        }
    }

    /// Check the pending request against its deadline.
    ///
    /// On timeout the request is counted as failed and a retry is returned;
    /// the caller sends it and surfaces the failure.
    pub fn poll_timeout(&mut self, room_id: &str, now: Instant) -> Option<ClientMessage> {
        let Phase::Awaiting {
            requested_at,
            attempts,
            ..
        } = &mut self.phase
        else {
            return None;
        };
        if now.saturating_duration_since(*requested_at) < self.timeout {
            return None;
        }
        warn!(room_id, attempts = *attempts, "room state request timed out; retrying");
        *requested_at = now;
        *attempts = attempts.saturating_add(1);
        Some(request(room_id))
    }
}

fn request(room_id: &str) -> ClientMessage {
    ClientMessage::RequestRoomState {
        room_id: room_id.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::number::NumberCode;
    use crate::protocol::{NumberCalled, RoomPrizeUpdated, RoomStateSync, RoomStatus};

    fn called(value: u8) -> RoomEvent {
        RoomEvent::NumberCalled(NumberCalled {
            room_id: "r".into(),
            round_number: 1,
            number: NumberCode::from_ball(value).unwrap(),
        })
    }

    fn snapshot() -> RoomEvent {
        RoomEvent::RoomStateSync(Box::new(RoomStateSync {
            room_id: "r".into(),
            round_number: 1,
            called_numbers: vec![],
            status: RoomStatus::Active,
            pattern: None,
            winners: vec![],
            has_claimed: None,
            claim_seconds_remaining: None,
            transition_seconds_remaining: None,
            marked_numbers: Default::default(),
            cards: vec![],
        }))
    }

    #[test]
    fn buffers_round_events_until_snapshot() {
        let now = Instant::now();
        let mut sync = Synchronizer::awaiting(DEFAULT_SYNC_TIMEOUT, now);
        assert_eq!(sync.admit(called(1)), Admission::Buffered);
        assert_eq!(sync.admit(called(2)), Admission::Buffered);
        match sync.admit(snapshot()) {
            Admission::Snapshot { discarded, .. } => assert_eq!(discarded, 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(sync.is_live());
        assert_eq!(sync.admit(called(3)), Admission::Apply(called(3)));
    }

    #[test]
    fn prize_updates_pass_through_while_waiting() {
        let now = Instant::now();
        let mut sync = Synchronizer::awaiting(DEFAULT_SYNC_TIMEOUT, now);
        let prize = RoomEvent::RoomPrizeUpdated(RoomPrizeUpdated {
            room_id: "r".into(),
            total_prize: 10.0,
            enrolled_cards_count: 3,
            rewards: vec![],
        });
        assert!(matches!(sync.admit(prize), Admission::Apply(_)));
        assert!(!sync.is_live());
    }

    #[test]
    fn timeout_retries_and_counts_attempts() {
        let now = Instant::now();
        let mut sync = Synchronizer::awaiting(Duration::from_secs(5), now);
        assert!(sync.poll_timeout("r", now + Duration::from_secs(4)).is_none());
        let retry = sync.poll_timeout("r", now + Duration::from_secs(5)).unwrap();
        assert_eq!(
            retry,
            ClientMessage::RequestRoomState {
                room_id: "r".into()
            }
        );
        assert_eq!(sync.attempts(), 2);
        // The deadline is re-anchored at the retry.
        assert!(sync.poll_timeout("r", now + Duration::from_secs(9)).is_none());
    }

    #[test]
    fn live_synchronizer_never_times_out() {
        let now = Instant::now();
        let mut sync = Synchronizer::awaiting(Duration::from_secs(1), now);
        sync.admit(snapshot());
        assert!(sync.poll_timeout("r", now + Duration::from_secs(60)).is_none());
        assert_eq!(sync.attempts(), 0);
    }
}
