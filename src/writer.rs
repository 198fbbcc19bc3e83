//! Cursor-driven writer.
//!
//! Writes proceed strictly left to right from the start of `buf`. A write
//! whose target lies past the modeled frame is dropped; only the cursor
//! moves.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::{self, Frame, Segment, FRAME_LEN};
use crate::plan::WritePlan;

/// Progress of the current plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteState {
    cursor: usize,
    written_mask: [bool; FRAME_LEN],
}

impl Default for WriteState {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteState {
    /// Fresh state: cursor at 0, nothing written.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cursor: 0,
            written_mask: [false; FRAME_LEN],
        }
    }

    /// Offset within `buf` of the next byte to write.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Which absolute frame positions this plan has written.
    #[must_use]
    pub const fn written_mask(&self) -> &[bool; FRAME_LEN] {
        &self.written_mask
    }

    /// Number of frame positions written so far.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.written_mask.iter().filter(|w| **w).count()
    }

    /// True once every plan byte has been consumed.
    #[must_use]
    pub const fn is_exhausted(&self, plan: &WritePlan) -> bool {
        self.cursor >= plan.length
    }
}

/// What a single write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// A byte was stored in the frame.
    Written {
        /// Absolute frame index.
        index: usize,
        /// Byte stored.
        byte: u8,
        /// Segment that received it.
        segment: Segment,
    },
    /// The target lay past the frame; the byte went nowhere.
    Dropped {
        /// Absolute index that would have been written.
        index: usize,
    },
    /// The plan had nothing left to write.
    Exhausted,
}

/// Tally of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Bytes stored inside the frame.
    pub written: usize,
    /// Bytes that fell off the end of the frame.
    pub dropped: usize,
    /// Guarded segments (not `buf`) touched by this batch, in write order.
    pub reached: Vec<Segment>,
}

/// Applies the next plan byte.
pub fn write_one(
    frame: &mut Frame,
    plan: &WritePlan,
    state: &mut WriteState,
    rng: &mut dyn RngCore,
) -> WriteOutcome {
    let Some(byte) = plan.byte_at(state.cursor, rng) else {
        return WriteOutcome::Exhausted;
    };

    let index = frame::offset(Segment::Buf) + state.cursor;
    state.cursor += 1;

    match frame::segment_at(index) {
        Some(segment) => {
            frame.put(index, byte);
            state.written_mask[index] = true;
            debug!(index, byte, segment = %segment, "frame byte written");
            WriteOutcome::Written {
                index,
                byte,
                segment,
            }
        }
        None => {
            debug!(index, "write past modeled frame dropped");
            WriteOutcome::Dropped { index }
        }
    }
}

/// Applies every remaining plan byte in one batch.
///
/// Final state equals calling [`write_one`] until it reports
/// [`WriteOutcome::Exhausted`].
pub fn write_all(
    frame: &mut Frame,
    plan: &WritePlan,
    state: &mut WriteState,
    rng: &mut dyn RngCore,
) -> WriteSummary {
    let mut summary = WriteSummary::default();
    loop {
        match write_one(frame, plan, state, rng) {
            WriteOutcome::Written { segment, .. } => {
                summary.written += 1;
                if segment != Segment::Buf && !summary.reached.contains(&segment) {
                    summary.reached.push(segment);
                }
            }
            WriteOutcome::Dropped { .. } => summary.dropped += 1,
            WriteOutcome::Exhausted => break,
        }
    }
    summary
}
