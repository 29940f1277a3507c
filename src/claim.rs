//! Personal claim tracking.
//!
//! [`ClaimFlag`] answers "has the local player already claimed bingo in this
//! round?" as of the moment it is asked. It is a shared cell, not a value:
//! the client handle writes it synchronously when a claim is submitted and
//! the transport loop reads it inside its long-lived event handler, so the
//! handler can never see a copy captured before the claim.
//!
//! Round and flag are packed into one atomic word so a claim and a round
//! change can never interleave into a torn state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CLAIMED_BIT: u64 = 1;

fn pack(round: u32, claimed: bool) -> u64 {
    (u64::from(round) << 32) | u64::from(claimed)
}

fn round_of(word: u64) -> u32 {
    // The shift leaves only the high 32 bits.
    u32::try_from(word >> 32).unwrap_or(u32::MAX)
}

/// Shared, always-fresh claim flag for one room subscription.
///
/// Cloning yields another handle to the same cell.
///
/// ```
/// use bingo_sync_client::claim::ClaimFlag;
///
/// let flag = ClaimFlag::new(3);
/// let seen_by_handler = flag.clone();
/// let handler = move || seen_by_handler.has_claimed();
///
/// flag.mark_claimed();
/// assert!(handler());
///
/// // Only a strictly newer round clears it.
/// assert!(!flag.observe_round(3));
/// assert!(flag.has_claimed());
/// assert!(flag.observe_round(4));
/// assert!(!flag.has_claimed());
/// ```
#[derive(Debug, Clone)]
pub struct ClaimFlag {
    word: Arc<AtomicU64>,
}

impl ClaimFlag {
    /// Create an unclaimed flag for `round`.
    pub fn new(round: u32) -> Self {
        Self {
            word: Arc::new(AtomicU64::new(pack(round, false))),
        }
    }

    /// Record that the local player submitted a claim in the current round.
    ///
    /// A claim the server later rejects still counts.
    pub fn mark_claimed(&self) {
        self.word.fetch_or(CLAIMED_BIT, Ordering::AcqRel);
    }

    /// Returns the flag as of now.
    pub fn has_claimed(&self) -> bool {
        self.word.load(Ordering::Acquire) & CLAIMED_BIT != 0
    }

    /// Round the flag currently refers to.
    pub fn round(&self) -> u32 {
        round_of(self.word.load(Ordering::Acquire))
    }

    /// Advance to `round`, clearing the flag iff `round` is strictly newer.
    ///
    /// Returns `true` if the flag was reset.
    pub fn observe_round(&self, round: u32) -> bool {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (round > round_of(word)).then(|| pack(round, false))
            })
            .is_ok()
    }

    /// Adopt the server's view of the claim for `round` after a resync.
    ///
    /// A newer round resets first; `Some(true)` then marks the claim. The flag
    /// is never cleared within a round, since a local claim may be in flight.
    pub fn restore(&self, round: u32, server_says_claimed: Option<bool>) {
        self.observe_round(round);
        if server_says_claimed == Some(true) && self.round() == round {
            self.mark_claimed();
        }
    }
}

impl Default for ClaimFlag {
    fn default() -> Self {
        Self::new(0)
    }
}
