//! Modal and notification lifecycles.
//!
//! [`Orchestrator`] maps round transitions to modal open/close state,
//! celebration animations and transient notifications. The pattern modal is
//! user-controlled only: no server event ever closes it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Default on-screen time of a transient notification.
pub const DEFAULT_NOTIFICATION_DURATION: Duration = Duration::from_secs(3);

/// Modals the client tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModalKind {
    /// Bingo validation in progress (claim window).
    Validation,
    CardPreview,
    Winners,
    /// The round's winning pattern.
    Pattern,
}

impl ModalKind {
    /// Modals that only the player may close.
    pub fn is_user_controlled(self) -> bool {
        matches!(self, Self::Pattern)
    }
}

/// Open/closed state per modal kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModalSet {
    pub validation: bool,
    pub card_preview: bool,
    pub winners: bool,
    pub pattern: bool,
}

impl ModalSet {
    fn slot(&mut self, kind: ModalKind) -> &mut bool {
        match kind {
            ModalKind::Validation => &mut self.validation,
            ModalKind::CardPreview => &mut self.card_preview,
            ModalKind::Winners => &mut self.winners,
            ModalKind::Pattern => &mut self.pattern,
        }
    }

    pub fn is_open(&self, kind: ModalKind) -> bool {
        match kind {
            ModalKind::Validation => self.validation,
            ModalKind::CardPreview => self.card_preview,
            ModalKind::Winners => self.winners,
            ModalKind::Pattern => self.pattern,
        }
    }

    pub fn open(&mut self, kind: ModalKind) {
        *self.slot(kind) = true;
    }

    pub fn close(&mut self, kind: ModalKind) {
        *self.slot(kind) = false;
    }

    /// Close every server-controlled modal.
    fn close_server_controlled(&mut self) {
        self.validation = false;
        self.card_preview = false;
        self.winners = false;
    }
}

/// Celebration animations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Animations {
    pub confetti: bool,
    pub loser: bool,
}

/// Kinds of transient notification. At most one of each kind is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// The server validated the local player's bingo.
    BingoConfirmed,
    /// The server rejected the local player's bingo.
    BingoRejected,
    /// The claim request itself was refused (e.g. insufficient balance).
    ClaimRejected,
    /// Room state could not be synchronized; stays until sync succeeds.
    SyncFailed,
    Info,
}

impl NotificationKind {
    fn duration(self, base: Duration) -> Option<Duration> {
        match self {
            Self::BingoConfirmed => Some(base.mul_f64(1.5)),
            Self::SyncFailed => None,
            Self::BingoRejected | Self::ClaimRejected | Self::Info => Some(base),
        }
    }
}

/// An active notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Message text, verbatim from its source.
    pub message: String,
    /// `None` for banners that stay until dismissed.
    pub expires_at: Option<Instant>,
}

/// Active notifications with auto-dismiss deadlines.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    base_duration: Duration,
    active: Vec<Notification>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_DURATION)
    }
}

impl NotificationCenter {
    pub fn new(base_duration: Duration) -> Self {
        Self {
            base_duration,
            active: Vec::new(),
        }
    }

    /// Show a notification, replacing any active one of the same kind.
    pub fn issue(&mut self, kind: NotificationKind, message: impl Into<String>, now: Instant) {
        self.active.retain(|n| n.kind != kind);
        self.active.push(Notification {
            kind,
            message: message.into(),
            expires_at: kind.duration(self.base_duration).map(|d| now + d),
        });
    }

    /// Remove the notification of `kind`. Returns `true` if one was active.
    pub fn dismiss(&mut self, kind: NotificationKind) -> bool {
        let before = self.active.len();
        self.active.retain(|n| n.kind != kind);
        before != self.active.len()
    }

    /// Drop every notification whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.active.len();
        self.active
            .retain(|n| n.expires_at.is_none_or(|deadline| now < deadline));
        before != self.active.len()
    }

    pub fn get(&self, kind: NotificationKind) -> Option<&Notification> {
        self.active.iter().find(|n| n.kind == kind)
    }

    pub fn active(&self) -> &[Notification] {
        &self.active
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

/// Modal, animation and notification state for one room subscription.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    modals: ModalSet,
    animations: Animations,
    notifications: NotificationCenter,
}

impl Orchestrator {
    pub fn new(notification_duration: Duration) -> Self {
        Self {
            modals: ModalSet::default(),
            animations: Animations::default(),
            notifications: NotificationCenter::new(notification_duration),
        }
    }

    pub fn modals(&self) -> ModalSet {
        self.modals
    }

    pub fn animations(&self) -> Animations {
        self.animations
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    /// Player-initiated open.
    pub fn open(&mut self, kind: ModalKind) {
        self.modals.open(kind);
    }

    /// Player-initiated close.
    pub fn close(&mut self, kind: ModalKind) {
        self.modals.close(kind);
    }

    /// Someone claimed bingo: show validation and pick the animation.
    pub fn on_bingo_claimed(&mut self, local_winner: bool, show_loser: bool) {
        self.modals.open(ModalKind::Validation);
        if local_winner {
            self.animations.confetti = true;
            self.animations.loser = false;
        } else if show_loser {
            self.animations.loser = true;
        }
    }

    /// Safety net: the claim window reached zero, so nothing about the claim
    /// may stay on screen, even if cleanup never arrives.
    pub fn on_claim_window_closed(&mut self) {
        debug!("claim window closed; force-closing validation modal");
        self.modals.close(ModalKind::Validation);
        self.animations = Animations::default();
    }

    pub fn on_round_finished(&mut self, has_winners: bool) {
        if has_winners {
            self.modals.open(ModalKind::Winners);
        }
    }

    pub fn on_round_cleanup(&mut self) {
        self.modals.close_server_controlled();
        self.animations = Animations::default();
    }

    pub fn on_round_started(&mut self) {
        self.modals.close_server_controlled();
        self.animations = Animations::default();
    }

    /// The server confirmed the local player's bingo.
    pub fn on_bingo_confirmed(&mut self, now: Instant) {
        self.animations.confetti = true;
        self.animations.loser = false;
        self.notifications
            .issue(NotificationKind::BingoConfirmed, "Bingo confirmed!", now);
    }

    pub fn on_bingo_rejected(&mut self, now: Instant) {
        self.animations.confetti = false;
        self.notifications.issue(
            NotificationKind::BingoRejected,
            "Your bingo was not valid.",
            now,
        );
    }

    /// Drop expired notifications. Returns `true` if any expired.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.notifications.expire(now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_notifications_last_half_again_as_long() {
        let now = Instant::now();
        let mut center = NotificationCenter::new(Duration::from_secs(2));
        center.issue(NotificationKind::BingoConfirmed, "yes", now);
        center.issue(NotificationKind::Info, "fyi", now);
        assert_eq!(
            center.get(NotificationKind::BingoConfirmed).unwrap().expires_at,
            Some(now + Duration::from_secs(3))
        );
        assert_eq!(
            center.get(NotificationKind::Info).unwrap().expires_at,
            Some(now + Duration::from_secs(2))
        );

        assert!(center.expire(now + Duration::from_millis(2_500)));
        assert!(center.get(NotificationKind::Info).is_none());
        assert!(center.get(NotificationKind::BingoConfirmed).is_some());
    }

    #[test]
    fn same_kind_replaces_previous() {
        let now = Instant::now();
        let mut center = NotificationCenter::default();
        center.issue(NotificationKind::ClaimRejected, "first", now);
        center.issue(NotificationKind::ClaimRejected, "second", now);
        assert_eq!(center.active().len(), 1);
        assert_eq!(center.active()[0].message, "second");
    }

    #[test]
    fn sync_banner_stays_until_dismissed() {
        let now = Instant::now();
        let mut center = NotificationCenter::default();
        center.issue(NotificationKind::SyncFailed, "offline", now);
        assert!(!center.expire(now + Duration::from_secs(3600)));
        assert!(center.dismiss(NotificationKind::SyncFailed));
        assert!(!center.dismiss(NotificationKind::SyncFailed));
    }

    #[test]
    fn round_events_never_close_pattern_modal() {
        let mut orch = Orchestrator::default();
        for kind in [
            ModalKind::Validation,
            ModalKind::CardPreview,
            ModalKind::Winners,
            ModalKind::Pattern,
        ] {
            orch.open(kind);
        }
        orch.on_round_cleanup();
        assert_eq!(
            orch.modals(),
            ModalSet {
                pattern: true,
                ..ModalSet::default()
            }
        );
        orch.on_round_started();
        assert!(orch.modals().is_open(ModalKind::Pattern));
        assert!(ModalKind::Pattern.is_user_controlled());
    }

    #[test]
    fn safety_net_clears_validation_and_animations() {
        let mut orch = Orchestrator::default();
        orch.on_bingo_claimed(false, true);
        assert!(orch.modals().validation);
        assert!(orch.animations().loser);
        orch.on_claim_window_closed();
        assert!(!orch.modals().validation);
        assert_eq!(orch.animations(), Animations::default());
    }

    #[test]
    fn local_winner_gets_confetti_not_loser() {
        let mut orch = Orchestrator::default();
        orch.on_bingo_claimed(true, false);
        assert!(orch.animations().confetti);
        assert!(!orch.animations().loser);
    }
}
