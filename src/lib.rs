//! # stackframe-sim - a conceptual stack-frame overflow simulator
//!
//! Models a 40-byte frame (`buf | canary | rbp | ret`) and shows, by plain
//! byte comparison, how writing past the end of `buf` corrupts the fields
//! that follow it, and how protection flags change the simulated outcome.
//! Nothing here computes addresses or transfers control; verdicts are
//! derived only from which bytes differ from their initial values.
//!
//! ## Core Concepts
//!
//! - **Frame**: fixed segment layout plus a byte buffer
//! - **WritePlan**: a byte pattern truncated to a length
//! - **Writer**: applies plan bytes left to right from the start of `buf`
//! - **Status**: which guarded segments changed, and the resulting verdict
//! - **Phase**: `Write -> Check -> Return -> Done`, or `Blocked`
//!
//! ## Usage
//!
//! ```rust
//! use stackframe_sim::{Mitigations, Pattern, Phase, Session, SimConfig, Verdict};
//!
//! let mut session = Session::new(&SimConfig::default().with_seed(7))?;
//! session.set_plan(Pattern::FixedByte, 24)?;
//! let view = session.run_all();
//! assert_eq!(view.verdict, Verdict::AdjacentAlteredUndetected);
//!
//! let view = session.set_mitigations(Mitigations::none().with_canary_check(true));
//! assert_eq!(view.phase, Phase::Blocked);
//! # Ok::<(), stackframe_sim::SimError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod frame;
pub mod narration;
pub mod phase;
pub mod plan;
pub mod session;
pub mod stager;
pub mod status;
pub mod writer;

// Re-export primary types at crate root for convenience
pub use config::SimConfig;
pub use error::{SchedulerError, SimError, SimResult, ValidationError};
pub use frame::{segment_at, Frame, Segment, SegmentSpec, Snapshot, FRAME_LEN, LAYOUT};
pub use narration::{NarrationEntry, NarrationLog};
pub use phase::{Phase, PhaseMachine, Route, StageTicket, Transition};
pub use plan::{Pattern, WritePlan};
pub use session::{Session, SessionId, SessionView};
pub use stager::{PhaseEvent, StagedSession};
pub use status::{evaluate, Mitigations, Status, Verdict};
pub use writer::{write_all, write_one, WriteOutcome, WriteState, WriteSummary};
