//! Status engine: compares the guarded segments against the snapshot and
//! classifies the outcome.
//!
//! Verdict priority is an ordered rule table ([`VERDICT_RULES`]); the first
//! rule whose predicate holds wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{self, Frame, Segment, Snapshot};

/// Protection toggles. They never touch the buffer; they only change the
/// verdict and illustrative captions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Mitigations {
    /// Sentinel is checked before return.
    pub canary_check_enabled: bool,
    /// Stack pages are not executable.
    pub non_executable_stack: bool,
    /// Address layout is randomized per run.
    pub address_randomization_enabled: bool,
}

impl Mitigations {
    /// Every protection disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            canary_check_enabled: false,
            non_executable_stack: false,
            address_randomization_enabled: false,
        }
    }

    /// Every protection enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            canary_check_enabled: true,
            non_executable_stack: true,
            address_randomization_enabled: true,
        }
    }

    /// Copy with the canary check set to `enabled`.
    #[must_use]
    pub const fn with_canary_check(mut self, enabled: bool) -> Self {
        self.canary_check_enabled = enabled;
        self
    }

    /// Copy with the non-executable stack flag set to `enabled`.
    #[must_use]
    pub const fn with_non_executable_stack(mut self, enabled: bool) -> Self {
        self.non_executable_stack = enabled;
        self
    }

    /// Copy with address randomization set to `enabled`.
    #[must_use]
    pub const fn with_address_randomization(mut self, enabled: bool) -> Self {
        self.address_randomization_enabled = enabled;
        self
    }
}

/// Outcome class derived from the changed segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Canary check enabled and the canary changed; the return never happens.
    Blocked,
    /// Return address changed; control flow after return is unpredictable.
    ReturnAltered,
    /// Saved frame pointer changed.
    FramePointerAltered,
    /// Canary changed but nobody checks it.
    AdjacentAlteredUndetected,
    /// Nothing beyond `buf` changed.
    NoCorruption,
}

impl Verdict {
    /// Narration text. Only [`Verdict::ReturnAltered`] varies with the
    /// non-executable stack flag, and only in wording.
    #[must_use]
    pub const fn caption(self, mitigations: Mitigations) -> &'static str {
        match self {
            Self::Blocked => "blocked: sentinel check fails before return",
            Self::ReturnAltered => {
                if mitigations.non_executable_stack {
                    "return address altered: control flow after return is unpredictable \
                     (stack is non-executable, so injected bytes cannot run in place)"
                } else {
                    "return address altered: control flow after return is unpredictable"
                }
            }
            Self::FramePointerAltered => "frame pointer altered",
            Self::AdjacentAlteredUndetected => "adjacent memory altered, undetected",
            Self::NoCorruption => "no adjacent corruption",
        }
    }

    /// True for any verdict other than [`Verdict::NoCorruption`].
    #[must_use]
    pub const fn is_corrupted(self) -> bool {
        !matches!(self, Self::NoCorruption)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.caption(Mitigations::none()))
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Any canary byte differs from the snapshot.
    pub canary_changed: bool,
    /// Any saved frame pointer byte differs.
    pub rbp_changed: bool,
    /// Any return address byte differs.
    pub ret_changed: bool,
    /// Absolute indices of guarded bytes that differ from the snapshot.
    pub changed_bytes: Vec<usize>,
    /// Classified outcome.
    pub verdict: Verdict,
}

impl Status {
    /// Whether `segment` differs from its snapshot. `buf` is never tracked.
    #[must_use]
    pub const fn changed(&self, segment: Segment) -> bool {
        match segment {
            Segment::Buf => false,
            Segment::Canary => self.canary_changed,
            Segment::Rbp => self.rbp_changed,
            Segment::Ret => self.ret_changed,
        }
    }
}

/// One verdict rule: predicate over (status, mitigations) and its result.
#[derive(Clone, Copy)]
pub struct VerdictRule {
    /// Rule name for logs.
    pub name: &'static str,
    /// Whether the rule fires.
    pub applies: fn(&Status, Mitigations) -> bool,
    /// Verdict produced when it fires.
    pub verdict: Verdict,
}

impl fmt::Debug for VerdictRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerdictRule")
            .field("name", &self.name)
            .field("verdict", &self.verdict)
            .finish_non_exhaustive()
    }
}

/// Verdict rules in priority order.
pub const VERDICT_RULES: [VerdictRule; 5] = [
    VerdictRule {
        name: "canary_check_failed",
        applies: |s, m| m.canary_check_enabled && s.canary_changed,
        verdict: Verdict::Blocked,
    },
    VerdictRule {
        name: "return_address_changed",
        applies: |s, _| s.ret_changed,
        verdict: Verdict::ReturnAltered,
    },
    VerdictRule {
        name: "frame_pointer_changed",
        applies: |s, _| s.rbp_changed,
        verdict: Verdict::FramePointerAltered,
    },
    VerdictRule {
        name: "canary_changed_unchecked",
        applies: |s, _| s.canary_changed,
        verdict: Verdict::AdjacentAlteredUndetected,
    },
    VerdictRule {
        name: "clean",
        applies: |_, _| true,
        verdict: Verdict::NoCorruption,
    },
];

/// Walks [`VERDICT_RULES`] and returns the first match.
#[must_use]
pub fn classify(status: &Status, mitigations: Mitigations) -> Verdict {
    VERDICT_RULES
        .iter()
        .find(|rule| (rule.applies)(status, mitigations))
        .map_or(Verdict::NoCorruption, |rule| rule.verdict)
}

/// Compares the frame's guarded segments with `snapshot`.
///
/// Pure: may be called at any time, including mid-write.
#[must_use]
pub fn evaluate(frame: &Frame, snapshot: &Snapshot, mitigations: Mitigations) -> Status {
    let mut changed_bytes = Vec::new();
    let mut diff = |segment: Segment| -> bool {
        let Some(original) = snapshot.get(segment) else {
            return false;
        };
        let start = frame::offset(segment);
        let mut any = false;
        for (i, (now, then)) in frame.segment_bytes(segment).iter().zip(original).enumerate() {
            if now != then {
                changed_bytes.push(start + i);
                any = true;
            }
        }
        any
    };

    let canary_changed = diff(Segment::Canary);
    let rbp_changed = diff(Segment::Rbp);
    let ret_changed = diff(Segment::Ret);

    let mut status = Status {
        canary_changed,
        rbp_changed,
        ret_changed,
        changed_bytes,
        verdict: Verdict::NoCorruption,
    };
    status.verdict = classify(&status, mitigations);
    status
}

/// Illustrative text for the saved frame pointer and return address.
///
/// With address randomization on, the text notes that real values would
/// differ per run. The model itself never randomizes them.
#[must_use]
pub fn address_caption(frame: &Frame, mitigations: Mitigations) -> [String; 2] {
    let suffix = if mitigations.address_randomization_enabled {
        " (illustrative; a randomized layout would shift this every run)"
    } else {
        " (illustrative constant)"
    };
    [
        format!("rbp = 0x{:016x}{suffix}", frame.read_u64_le(Segment::Rbp)),
        format!("ret = 0x{:016x}{suffix}", frame.read_u64_le(Segment::Ret)),
    ]
}
