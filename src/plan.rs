//! Write plans: which byte lands at each cursor position.
//!
//! A plan is a policy plus a length. Bytes are produced on demand by
//! [`WritePlan::byte_at`]; nothing is materialized up front.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Filler byte used by [`Pattern::FixedByte`] (`'A'`).
pub const FIXED_BYTE: u8 = 0x41;

/// Cycle used by [`Pattern::RepeatingSequence`] (`"ABCD"`).
pub const REPEATING_SEQUENCE: [u8; 4] = [0x41, 0x42, 0x43, 0x44];

/// Substitute byte for an empty custom text (`'?'`).
pub const EMPTY_TEXT_BYTE: u8 = 0x3F;

/// Byte-generation policy of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pattern {
    /// `0x41` at every index.
    FixedByte,
    /// `A B C D` repeated by `index mod 4`.
    RepeatingSequence,
    /// A fresh random byte per read. Not replayable.
    Random,
    /// The UTF-8 bytes of `text`, cycled by `index mod len`.
    CustomText {
        /// User-supplied text.
        text: String,
    },
}

impl Pattern {
    /// Convenience constructor for [`Pattern::CustomText`].
    #[must_use]
    pub fn custom(text: impl Into<String>) -> Self {
        Self::CustomText { text: text.into() }
    }

    /// Whether re-reading an index always yields the same byte.
    #[must_use]
    pub const fn is_deterministic(&self) -> bool {
        !matches!(self, Self::Random)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedByte => write!(f, "fixed"),
            Self::RepeatingSequence => write!(f, "repeat"),
            Self::Random => write!(f, "random"),
            Self::CustomText { text } => write!(f, "text:{text}"),
        }
    }
}

impl FromStr for Pattern {
    type Err = ValidationError;

    /// Parses `fixed`, `repeat`, `random` or `text:<anything>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(text) = s.strip_prefix("text:") {
            return Ok(Self::custom(text));
        }
        match s {
            "fixed" => Ok(Self::FixedByte),
            "repeat" => Ok(Self::RepeatingSequence),
            "random" => Ok(Self::Random),
            other => Err(ValidationError::UnknownPattern {
                name: other.to_string(),
            }),
        }
    }
}

/// A pattern truncated to `length` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePlan {
    /// Byte policy.
    pub pattern: Pattern,
    /// Number of bytes the plan writes. Zero writes nothing.
    pub length: usize,
}

impl WritePlan {
    /// Builds a plan. Any length is accepted, including zero.
    #[must_use]
    pub fn build(pattern: Pattern, length: usize) -> Self {
        Self { pattern, length }
    }

    /// The byte for `index`, or `None` once `index >= length`.
    ///
    /// `rng` is only consulted by [`Pattern::Random`].
    pub fn byte_at(&self, index: usize, rng: &mut dyn RngCore) -> Option<u8> {
        if index >= self.length {
            return None;
        }
        let byte = match &self.pattern {
            Pattern::FixedByte => FIXED_BYTE,
            Pattern::RepeatingSequence => REPEATING_SEQUENCE[index % REPEATING_SEQUENCE.len()],
            Pattern::Random => {
                let mut one = [0u8; 1];
                rng.fill_bytes(&mut one);
                one[0]
            }
            Pattern::CustomText { text } => {
                let raw = text.as_bytes();
                if raw.is_empty() {
                    EMPTY_TEXT_BYTE
                } else {
                    raw[index % raw.len()]
                }
            }
        };
        Some(byte)
    }

    /// Lazily yields the plan's bytes from index 0. Restartable: each call
    /// begins a new pass.
    pub fn bytes<'a>(&'a self, rng: &'a mut dyn RngCore) -> PlanBytes<'a> {
        PlanBytes {
            plan: self,
            rng,
            next: 0,
        }
    }
}

/// Iterator over a plan's bytes. See [`WritePlan::bytes`].
pub struct PlanBytes<'a> {
    plan: &'a WritePlan,
    rng: &'a mut dyn RngCore,
    next: usize,
}

impl Iterator for PlanBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let byte = self.plan.byte_at(self.next, &mut *self.rng)?;
        self.next += 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.length.saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for PlanBytes<'_> {}
