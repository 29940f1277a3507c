//! Validation and shaping of inbound server frames.
//!
//! The normalizer turns a raw `(kind, payload)` pair into a typed
//! [`RoomEvent`] or a [`DiscardedEvent`]. It never fails: a frame whose
//! expected collection field is absent, `null` or not an array is dropped,
//! logged and reported to the optional [`DiscardHook`], so downstream state is
//! never touched by it.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::protocol::{EventKind, RawEvent, RoomEvent};

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// The frame was not a `{"event", "data"}` envelope.
    Unparseable(String),
    /// The event name is not one the client understands.
    UnknownKind,
    /// The payload was not a JSON object.
    NotAnObject,
    /// A required collection field was absent or `null`.
    MissingCollection(&'static str),
    /// A collection field held something other than an array.
    NotACollection(&'static str),
    /// The payload had the right shape but a field had the wrong type.
    Malformed(String),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable(e) => write!(f, "unparseable frame: {e}"),
            Self::UnknownKind => f.write_str("unknown event kind"),
            Self::NotAnObject => f.write_str("payload is not an object"),
            Self::MissingCollection(field) => write!(f, "missing collection field `{field}`"),
            Self::NotACollection(field) => write!(f, "field `{field}` is not a collection"),
            Self::Malformed(e) => write!(f, "malformed payload: {e}"),
        }
    }
}

/// A frame the normalizer refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedEvent {
    /// Wire name of the frame, as received.
    pub kind: String,
    pub reason: DiscardReason,
}

/// Observability hook invoked for every discarded frame.
pub type DiscardHook = Arc<dyn Fn(&DiscardedEvent) + Send + Sync>;

/// Result of normalizing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Event(RoomEvent),
    Discard(DiscardedEvent),
}

/// Stateless frame validator with an optional discard hook.
#[derive(Clone, Default)]
pub struct Normalizer {
    hook: Option<DiscardHook>,
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hook that observes every discarded frame.
    #[must_use]
    pub fn with_hook(mut self, hook: DiscardHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Normalize a JSON text frame.
    pub fn normalize_text(&self, text: &str) -> Normalized {
        match serde_json::from_str::<RawEvent>(text) {
            Ok(raw) => self.normalize(&raw.event, raw.data),
            Err(e) => self.discard(String::new(), DiscardReason::Unparseable(e.to_string())),
        }
    }

    /// Normalize an event given its wire name and payload.
    pub fn normalize(&self, kind: &str, payload: Value) -> Normalized {
        match shape(kind, payload) {
            Ok(event) => Normalized::Event(event),
            Err(reason) => self.discard(kind.to_string(), reason),
        }
    }

    fn discard(&self, kind: String, reason: DiscardReason) -> Normalized {
        let discarded = DiscardedEvent { kind, reason };
        warn!(
            kind = %discarded.kind,
            reason = %discarded.reason,
            "discarding inbound event"
        );
        if let Some(hook) = &self.hook {
            hook(&discarded);
        }
        Normalized::Discard(discarded)
    }
}

fn shape(kind: &str, payload: Value) -> Result<RoomEvent, DiscardReason> {
    let kind = EventKind::from_wire(kind).ok_or(DiscardReason::UnknownKind)?;
    let Value::Object(mut map) = payload else {
        return Err(DiscardReason::NotAnObject);
    };

    match kind {
        EventKind::NumberCalled => typed(map).map(RoomEvent::NumberCalled),
        EventKind::BingoClaimed => {
            optional_collection(&mut map, "winners")?;
            let has_single = map.get("winner").is_some_and(Value::is_object);
            let has_batch = map
                .get("winners")
                .and_then(Value::as_array)
                .is_some_and(|w| !w.is_empty());
            if !has_single && !has_batch {
                return Err(DiscardReason::MissingCollection("winners"));
            }
            if map.get("winner").is_some_and(Value::is_null) {
                map.remove("winner");
            }
            typed(map).map(RoomEvent::BingoClaimed)
        }
        EventKind::BingoClaimCountdown => typed(map).map(RoomEvent::BingoClaimCountdown),
        EventKind::RoundFinished => typed(map).map(RoomEvent::RoundFinished),
        EventKind::RoundCleanup => typed(map).map(RoomEvent::RoundCleanup),
        EventKind::RoundTransitionCountdown => {
            typed(map).map(RoomEvent::RoundTransitionCountdown)
        }
        EventKind::RoundStarted => typed(map).map(RoomEvent::RoundStarted),
        EventKind::RoomStateSync => {
            required_collection(&map, "called_numbers")?;
            optional_collection(&mut map, "winners")?;
            optional_collection(&mut map, "cards")?;
            drop_cards_without_matrix(&mut map);
            typed(map).map(|sync| RoomEvent::RoomStateSync(Box::new(sync)))
        }
        EventKind::RoomPrizeUpdated => {
            required_collection(&map, "rewards")?;
            typed(map).map(RoomEvent::RoomPrizeUpdated)
        }
        EventKind::CardDetails => {
            required_matrix(&map)?;
            typed(map).map(RoomEvent::CardDetails)
        }
        EventKind::BingoValidated => typed(map).map(RoomEvent::BingoValidated),
        EventKind::ClaimResult => typed(map).map(RoomEvent::ClaimResult),
    }
}

fn typed<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T, DiscardReason> {
    serde_json::from_value(Value::Object(map)).map_err(|e| DiscardReason::Malformed(e.to_string()))
}

fn required_collection(map: &Map<String, Value>, field: &'static str) -> Result<(), DiscardReason> {
    match map.get(field) {
        None | Some(Value::Null) => Err(DiscardReason::MissingCollection(field)),
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(DiscardReason::NotACollection(field)),
    }
}

/// A `null` optional collection is treated as absent.
fn optional_collection(
    map: &mut Map<String, Value>,
    field: &'static str,
) -> Result<(), DiscardReason> {
    match map.get(field) {
        None | Some(Value::Array(_)) => Ok(()),
        Some(Value::Null) => {
            map.remove(field);
            Ok(())
        }
        Some(_) => Err(DiscardReason::NotACollection(field)),
    }
}

fn is_matrix(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .is_some_and(|columns| columns.iter().all(Value::is_array))
}

fn required_matrix(map: &Map<String, Value>) -> Result<(), DiscardReason> {
    required_collection(map, "numbers")?;
    if is_matrix(map.get("numbers")) {
        Ok(())
    } else {
        Err(DiscardReason::NotACollection("numbers"))
    }
}

/// Cards embedded in a snapshot are skipped individually instead of
/// dropping the whole snapshot.
fn drop_cards_without_matrix(map: &mut Map<String, Value>) {
    if let Some(Value::Array(cards)) = map.get_mut("cards") {
        cards.retain(|card| {
            let keep = is_matrix(card.get("numbers"));
            if !keep {
                warn!(
                    card_id = ?card.get("card_id"),
                    "skipping snapshot card without a number matrix"
                );
            }
            keep
        });
    }
}
