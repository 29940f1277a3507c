//! Wall-clock anchored countdowns.
//!
//! A [`Countdown`] stores an absolute deadline, never a remaining duration.
//! Each read recomputes `deadline - now`, so slow ticks or a suspended task
//! cannot make the displayed time drift from the real time left. A
//! superseded countdown is replaced, not adjusted.

use std::time::Duration;

use tokio::time::Instant;

/// Default length of the bingo claim window.
pub const DEFAULT_CLAIM_WINDOW: Duration = Duration::from_secs(45);

/// Default delay between round cleanup and the next round.
pub const DEFAULT_TRANSITION_DELAY: Duration = Duration::from_secs(20);

/// Fixed durations of the round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Claim window opened by the first `bingo-claimed`.
    pub claim_window: Duration,
    /// Transition countdown started by `round-cleanup`.
    pub transition: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            claim_window: DEFAULT_CLAIM_WINDOW,
            transition: DEFAULT_TRANSITION_DELAY,
        }
    }
}

/// A countdown anchored to an absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    deadline: Instant,
}

impl Countdown {
    /// Start a countdown that ends `length` after `now`.
    pub fn starting_at(now: Instant, length: Duration) -> Self {
        Self {
            deadline: now + length,
        }
    }

    /// Start a countdown from a whole number of seconds.
    pub fn from_seconds(now: Instant, seconds: u32) -> Self {
        Self::starting_at(now, Duration::from_secs(u64::from(seconds)))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left at `now`, zero once the deadline has passed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Whole seconds left at `now`, rounded up so `0` means expired.
    pub fn remaining_seconds(&self, now: Instant) -> u32 {
        let left = self.remaining(now);
        let mut secs = left.as_secs();
        if left.subsec_nanos() > 0 {
            secs += 1;
        }
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Returns `true` if both deadlines fall within `tolerance` of each other.
    pub fn agrees_with(&self, other: &Countdown, tolerance: Duration) -> bool {
        let gap = if self.deadline >= other.deadline {
            self.deadline - other.deadline
        } else {
            other.deadline - self.deadline
        };
        gap < tolerance
    }
}
