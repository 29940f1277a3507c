//! Card interaction rules.
//!
//! Decides whether a card may be opened for marking, shown as a winner, or
//! is blocked, and whether the "you lost" animation should play. Both are
//! pure functions of booleans read at call time; the claim flag must come
//! from [`ClaimFlag`](crate::claim::ClaimFlag), never a cached copy.

use crate::protocol::CardIndex;

/// How a card opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMode {
    /// Spectate the winner at this position in the room's winner list.
    ShowWinner { winner_index: usize },
    /// Open the card editor for marking.
    OpenEditor,
    Blocked,
}

/// Why a card is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    AlreadyClaimed,
    Transitioning,
}

/// Decision returned by [`GateContext::can_open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardAccess {
    pub allow: bool,
    pub mode: CardMode,
    pub reason: Option<BlockReason>,
}

impl CardAccess {
    fn allowed(mode: CardMode) -> Self {
        Self {
            allow: true,
            mode,
            reason: None,
        }
    }

    fn blocked(reason: BlockReason) -> Self {
        Self {
            allow: false,
            mode: CardMode::Blocked,
            reason: Some(reason),
        }
    }
}

/// Snapshot of the inputs the gate needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateContext {
    pub room_finished: bool,
    /// Number of winners known for the room.
    pub winner_count: usize,
    pub has_claimed_this_round: bool,
    pub is_transitioning: bool,
}

impl GateContext {
    /// Decide how the card at `card_index` opens. First match wins:
    ///
    /// 1. finished room with a winner at this index: spectate (overrides
    ///    every block)
    /// 2. already claimed this round: blocked
    /// 3. transitioning between rounds: blocked
    /// 4. otherwise: open the editor
    pub fn can_open(&self, card_index: CardIndex) -> CardAccess {
        if self.room_finished && card_index < self.winner_count {
            return CardAccess::allowed(CardMode::ShowWinner {
                winner_index: card_index,
            });
        }
        if self.has_claimed_this_round {
            return CardAccess::blocked(BlockReason::AlreadyClaimed);
        }
        if self.is_transitioning {
            return CardAccess::blocked(BlockReason::Transitioning);
        }
        CardAccess::allowed(CardMode::OpenEditor)
    }
}

/// Whether the "you lost" animation plays when someone claims bingo.
///
/// False for anyone holding a bingo, and for anyone who already claimed this
/// round even if none of their cards visibly completes the pattern.
pub fn show_loser(user_has_bingo_on_any_card: bool, has_claimed_this_round: bool) -> bool {
    !user_has_bingo_on_any_card && !has_claimed_this_round
}
