//! Bingo ball numbers and their column letters.
//!
//! A [`NumberCode`] is a called ball: a column letter plus a value in
//! `1..=75`. The wire carries either the raw ball integer or the
//! `"<letter>-<value>"` string; both deserialize to the same code, and codes
//! always serialize as the string. Ball value `0` is the FREE centre cell and
//! never becomes a `NumberCode`.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Highest ball value in a 75-ball game.
pub const MAX_BALL: u8 = 75;

/// Ball value used on cards for the FREE centre cell.
pub const FREE_BALL: u8 = 0;

/// Column letter of a bingo card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Letter {
    B,
    I,
    N,
    G,
    O,
}

impl Letter {
    /// Returns the column letter for a ball value, or `None` for FREE and
    /// out-of-range values.
    pub fn for_ball(value: u8) -> Option<Self> {
        match value {
            1..=15 => Some(Self::B),
            16..=30 => Some(Self::I),
            31..=45 => Some(Self::N),
            46..=60 => Some(Self::G),
            61..=75 => Some(Self::O),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Self::B => 'B',
            Self::I => 'I',
            Self::N => 'N',
            Self::G => 'G',
            Self::O => 'O',
        }
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A called ball, e.g. `B-7` or `O-64`.
///
/// The letter is always derived from the value, so two codes are equal iff
/// their values are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumberCode {
    letter: Letter,
    value: u8,
}

/// Why a raw ball value or string could not become a [`NumberCode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NumberCodeError {
    #[error("ball value 0 is the FREE cell")]
    Free,
    #[error("ball value {0} is outside 1..=75")]
    OutOfRange(i64),
    #[error("letter {letter} does not match ball value {value}")]
    LetterMismatch { letter: String, value: u8 },
    #[error("malformed number code: {0}")]
    Malformed(String),
}

impl NumberCode {
    /// Converts a raw ball value into its code.
    ///
    /// ```
    /// use bingo_sync_client::number::{Letter, NumberCode};
    ///
    /// let code = NumberCode::from_ball(17).unwrap();
    /// assert_eq!(code.letter(), Letter::I);
    /// assert_eq!(code.to_string(), "I-17");
    /// assert!(NumberCode::from_ball(0).is_err());
    /// ```
    pub fn from_ball(value: u8) -> Result<Self, NumberCodeError> {
        if value == FREE_BALL {
            return Err(NumberCodeError::Free);
        }
        Letter::for_ball(value)
            .map(|letter| Self { letter, value })
            .ok_or(NumberCodeError::OutOfRange(i64::from(value)))
    }

    fn from_wide(value: i64) -> Result<Self, NumberCodeError> {
        let narrow = u8::try_from(value).map_err(|_| NumberCodeError::OutOfRange(value))?;
        Self::from_ball(narrow)
    }

    /// Column letter.
    pub fn letter(&self) -> Letter {
        self.letter
    }

    /// Raw ball value in `1..=75`.
    pub fn value(&self) -> u8 {
        self.value
    }
}

impl fmt::Display for NumberCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.letter, self.value)
    }
}

impl FromStr for NumberCode {
    type Err = NumberCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Bare integers are accepted too: "17".
        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::from_wide(value);
        }
        let (letter, value) = trimmed
            .split_once('-')
            .ok_or_else(|| NumberCodeError::Malformed(s.to_string()))?;
        let value: i64 = value
            .parse()
            .map_err(|_| NumberCodeError::Malformed(s.to_string()))?;
        let code = Self::from_wide(value)?;
        if !letter.eq_ignore_ascii_case(&code.letter.to_string()) {
            return Err(NumberCodeError::LetterMismatch {
                letter: letter.to_string(),
                value: code.value,
            });
        }
        Ok(code)
    }
}

impl Serialize for NumberCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NumberCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CodeVisitor;

        impl Visitor<'_> for CodeVisitor {
            type Value = NumberCode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a ball value 1..=75 or a \"<letter>-<value>\" string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NumberCode, E> {
                NumberCode::from_wide(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NumberCode, E> {
                let wide = i64::try_from(v).unwrap_or(i64::MAX);
                NumberCode::from_wide(wide).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NumberCode, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(CodeVisitor)
    }
}
