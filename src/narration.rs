//! Bounded, most-recent-first narration log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default and largest number of retained entries.
pub const DEFAULT_LOG_CAPACITY: usize = 6;

/// A single narration line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationEntry {
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
    /// Human-readable text.
    pub text: String,
}

/// Narration log. Observational only; nothing reads it to make decisions.
#[derive(Debug, Clone)]
pub struct NarrationLog {
    entries: VecDeque<NarrationEntry>,
    capacity: usize,
}

impl Default for NarrationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl NarrationLog {
    /// Creates a log holding at most `capacity` entries, clamped to
    /// `1..=DEFAULT_LOG_CAPACITY`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, DEFAULT_LOG_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Records `text` as the newest entry, evicting the oldest past capacity.
    pub fn push(&mut self, text: impl Into<String>) {
        self.entries.push_front(NarrationEntry {
            at: Utc::now(),
            text: text.into(),
        });
        self.entries.truncate(self.capacity);
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NarrationEntry> {
        self.entries.iter()
    }

    /// Newest entry, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&NarrationEntry> {
        self.entries.front()
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the entries, newest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<NarrationEntry> {
        self.entries.iter().cloned().collect()
    }
}
