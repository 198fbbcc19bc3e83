//! Frame model: a fixed 40-byte region laid out as `buf | canary | rbp | ret`.
//!
//! Offsets are always derived from the segment sizes in [`LAYOUT`]; nothing
//! stores an offset on its own, so the layout cannot drift.

use std::ops::Range;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A named region of the simulated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Local buffer the plan writes into.
    Buf,
    /// Sentinel placed right after the buffer.
    Canary,
    /// Saved frame pointer.
    Rbp,
    /// Return address.
    Ret,
}

impl Segment {
    /// Short lowercase name, as drawn in the frame diagram.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Buf => "buf",
            Self::Canary => "canary",
            Self::Rbp => "rbp",
            Self::Ret => "ret",
        }
    }

    /// Segment size in bytes, as declared in [`LAYOUT`].
    #[must_use]
    pub fn size(self) -> usize {
        LAYOUT
            .iter()
            .find(|entry| entry.segment == self)
            .map_or(0, |entry| entry.size)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A `{name, size}` entry of the frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Which segment this entry describes.
    pub segment: Segment,
    /// Size in bytes.
    pub size: usize,
}

/// Ordered frame layout, lowest address first.
pub const LAYOUT: [SegmentSpec; 4] = [
    SegmentSpec { segment: Segment::Buf, size: 16 },
    SegmentSpec { segment: Segment::Canary, size: 8 },
    SegmentSpec { segment: Segment::Rbp, size: 8 },
    SegmentSpec { segment: Segment::Ret, size: 8 },
];

/// Total modeled frame length in bytes.
pub const FRAME_LEN: usize = LAYOUT[0].size + LAYOUT[1].size + LAYOUT[2].size + LAYOUT[3].size;

/// Segments captured in a [`Snapshot`] and watched for changes.
pub const GUARDED: [Segment; 3] = [Segment::Canary, Segment::Rbp, Segment::Ret];

/// Illustrative saved frame pointer. A constant, not an address.
pub const RBP_FILL: u64 = 0x0000_7ffd_cafe_f00d;

/// Illustrative return address. A constant, not an address.
pub const RET_FILL: u64 = 0x0000_5555_5555_1234;

/// Byte offset of `segment` from the start of the frame.
#[must_use]
pub fn offset(segment: Segment) -> usize {
    LAYOUT
        .iter()
        .take_while(|entry| entry.segment != segment)
        .map(|entry| entry.size)
        .sum()
}

/// Absolute byte range occupied by `segment`.
#[must_use]
pub fn range(segment: Segment) -> Range<usize> {
    let start = offset(segment);
    start..start + segment.size()
}

/// Maps an absolute byte index to its owning segment.
///
/// Returns `None` when the index lies beyond the modeled frame.
#[must_use]
pub fn segment_at(index: usize) -> Option<Segment> {
    let mut start = 0;
    for entry in &LAYOUT {
        if index < start + entry.size {
            return Some(entry.segment);
        }
        start += entry.size;
    }
    None
}

/// The simulated stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Allocates a frame and captures its [`Snapshot`].
    ///
    /// `buf` is zero-filled, `canary` gets 8 fresh random bytes from `rng`,
    /// `rbp` and `ret` get the fixed illustrative values.
    pub fn create(rng: &mut dyn RngCore) -> (Self, Snapshot) {
        let mut frame = Self {
            bytes: [0; FRAME_LEN],
        };
        rng.fill_bytes(&mut frame.bytes[range(Segment::Canary)]);
        frame.bytes[range(Segment::Rbp)].copy_from_slice(&RBP_FILL.to_le_bytes());
        frame.bytes[range(Segment::Ret)].copy_from_slice(&RET_FILL.to_le_bytes());

        let snapshot = Snapshot::capture(&frame);
        (frame, snapshot)
    }

    /// Raw frame contents.
    #[must_use]
    pub const fn bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Current bytes of one segment.
    #[must_use]
    pub fn segment_bytes(&self, segment: Segment) -> &[u8] {
        &self.bytes[range(segment)]
    }

    /// Reads an 8-byte segment as a little-endian integer.
    ///
    /// `buf` is 16 bytes wide; its first 8 bytes are read.
    #[must_use]
    pub fn read_u64_le(&self, segment: Segment) -> u64 {
        let start = offset(segment);
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.bytes[start..start + 8]);
        u64::from_le_bytes(word)
    }

    /// Byte distance from the start of `from` to the start of `to`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn distance(from: Segment, to: Segment) -> isize {
        offset(to) as isize - offset(from) as isize
    }

    /// Stores one byte. Callers guarantee `index < FRAME_LEN`.
    pub(crate) fn put(&mut self, index: usize, byte: u8) {
        self.bytes[index] = byte;
    }
}

/// Contents of the guarded segments at frame creation.
///
/// Immutable once captured; every change check compares against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    canary: [u8; 8],
    rbp: [u8; 8],
    ret: [u8; 8],
}

impl Snapshot {
    fn capture(frame: &Frame) -> Self {
        let mut snapshot = Self {
            canary: [0; 8],
            rbp: [0; 8],
            ret: [0; 8],
        };
        snapshot.canary.copy_from_slice(frame.segment_bytes(Segment::Canary));
        snapshot.rbp.copy_from_slice(frame.segment_bytes(Segment::Rbp));
        snapshot.ret.copy_from_slice(frame.segment_bytes(Segment::Ret));
        snapshot
    }

    /// Captured bytes of a guarded segment; `None` for `buf`.
    #[must_use]
    pub const fn get(&self, segment: Segment) -> Option<&[u8; 8]> {
        match segment {
            Segment::Buf => None,
            Segment::Canary => Some(&self.canary),
            Segment::Rbp => Some(&self.rbp),
            Segment::Ret => Some(&self.ret),
        }
    }

    /// Captured canary as a little-endian integer.
    #[must_use]
    pub const fn canary_u64(&self) -> u64 {
        u64::from_le_bytes(self.canary)
    }
}
