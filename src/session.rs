//! Simulation session: one frame, one plan, one phase machine.
//!
//! Every operation returns a fresh [`SessionView`]. None of them fail:
//! exhausted plans turn `step`/`run_all` into no-ops and out-of-frame
//! writes are dropped.

use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::SimConfig;
use crate::error::{SimResult, ValidationError};
use crate::frame::{offset, Frame, Segment, Snapshot, FRAME_LEN};
use crate::narration::{NarrationEntry, NarrationLog};
use crate::phase::{Phase, PhaseMachine, StageTicket, Transition};
use crate::plan::{Pattern, WritePlan};
use crate::status::{self, Mitigations, Status, Verdict};
use crate::writer::{self, WriteOutcome, WriteState};

/// Stable identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only rendering view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    /// Session identity.
    pub session_id: SessionId,
    /// Bumped on every reset or plan rebuild.
    pub generation: u64,
    /// Current frame contents.
    pub frame_bytes: Vec<u8>,
    /// Positions written by the current plan.
    pub written_mask: Vec<bool>,
    /// Next relative offset to write.
    pub cursor: usize,
    /// Active plan.
    pub plan: WritePlan,
    /// Current phase.
    pub phase: Phase,
    /// Current verdict.
    pub verdict: Verdict,
    /// Verdict text for the current flags.
    pub verdict_caption: String,
    /// Full status.
    pub status: Status,
    /// Current flags.
    pub mitigations: Mitigations,
    /// Illustrative `rbp`/`ret` text.
    pub address_captions: Vec<String>,
    /// Narration, newest first.
    pub log: Vec<NarrationEntry>,
    /// blake3 digest of `frame_bytes`, hex encoded.
    pub frame_digest: String,
}

impl SessionView {
    /// True once the plan has no bytes left.
    #[must_use]
    pub const fn is_write_complete(&self) -> bool {
        self.cursor >= self.plan.length
    }
}

/// One simulation session.
pub struct Session {
    id: SessionId,
    rng: StdRng,
    max_plan_length: usize,
    frame: Frame,
    snapshot: Snapshot,
    plan: WritePlan,
    write: WriteState,
    mitigations: Mitigations,
    status: Status,
    machine: PhaseMachine,
    log: NarrationLog,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.machine.generation())
            .field("plan", &self.plan)
            .field("cursor", &self.write.cursor())
            .field("phase", &self.machine.phase())
            .field("verdict", &self.status.verdict)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session from `config`.
    pub fn new(config: &SimConfig) -> SimResult<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (frame, snapshot) = Frame::create(&mut rng);
        let status = status::evaluate(&frame, &snapshot, config.mitigations);

        let mut session = Self {
            id: SessionId::new(),
            rng,
            max_plan_length: config.max_plan_length,
            frame,
            snapshot,
            plan: config.plan.clone(),
            write: WriteState::new(),
            mitigations: config.mitigations,
            status,
            machine: PhaseMachine::new(),
            log: NarrationLog::with_capacity(config.log_capacity),
        };
        session.machine.reset();
        session.log.push(format!(
            "new frame: canary 0x{:016x}, plan {} x {}",
            session.snapshot.canary_u64(),
            session.plan.pattern,
            session.plan.length
        ));
        session.settle_write_phase();
        info!(session = %session.id, "session created");
        Ok(session)
    }

    /// Session identity.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current frame.
    #[must_use]
    pub const fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Snapshot taken when the frame was created.
    #[must_use]
    pub const fn frame_snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Active plan.
    #[must_use]
    pub const fn plan(&self) -> &WritePlan {
        &self.plan
    }

    /// Write progress.
    #[must_use]
    pub const fn write_state(&self) -> &WriteState {
        &self.write
    }

    /// Current flags.
    #[must_use]
    pub const fn mitigations(&self) -> Mitigations {
        self.mitigations
    }

    /// Latest status.
    #[must_use]
    pub const fn status(&self) -> &Status {
        &self.status
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Staged phases still waiting.
    #[must_use]
    pub fn pending_phases(&self) -> Vec<Phase> {
        self.machine.pending()
    }

    /// Generation of the current frame + plan pairing.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.machine.generation()
    }

    /// Ticket for the next staged step, if any.
    #[must_use]
    pub fn pending_ticket(&self) -> Option<StageTicket> {
        self.machine.pending_ticket()
    }

    /// New frame, new snapshot and canary, zeroed write state, phase `Write`.
    /// The plan is kept. A zero-length plan settles the phase right away.
    pub fn reset(&mut self, mitigations: Mitigations) -> SessionView {
        let (frame, snapshot) = Frame::create(&mut self.rng);
        self.frame = frame;
        self.snapshot = snapshot;
        self.write = WriteState::new();
        self.mitigations = mitigations;
        self.machine.reset();
        self.status = status::evaluate(&self.frame, &self.snapshot, self.mitigations);

        info!(session = %self.id, generation = self.generation(), "frame reset");
        self.log.push(format!(
            "frame reset: new canary 0x{:016x}",
            self.snapshot.canary_u64()
        ));
        self.settle_write_phase();
        self.snapshot()
    }

    /// Rebuilds the plan and restarts the write phase.
    ///
    /// Frame contents, including the canary, are left as they are. A
    /// zero-length plan is exhausted from the start, so the phase settles
    /// right away.
    pub fn set_plan(&mut self, pattern: Pattern, length: usize) -> SimResult<SessionView> {
        if length > self.max_plan_length {
            return Err(ValidationError::PlanTooLong {
                length,
                max_length: self.max_plan_length,
            }
            .into());
        }

        self.plan = WritePlan::build(pattern, length);
        self.write = WriteState::new();
        self.machine.reset();

        info!(session = %self.id, generation = self.generation(), pattern = %self.plan.pattern, length, "plan rebuilt");
        self.log.push(format!("plan set: {} x {length}", self.plan.pattern));
        self.settle_write_phase();
        Ok(self.snapshot())
    }

    /// Writes one byte, then re-evaluates the phase if the plan is exhausted.
    pub fn step(&mut self) -> SessionView {
        let before = self.status.clone();
        let outcome = writer::write_one(&mut self.frame, &self.plan, &mut self.write, &mut self.rng);
        match outcome {
            WriteOutcome::Written { segment, index, .. } if segment != Segment::Buf => {
                if offset(segment) == index {
                    self.log.push(format!("write crossed into {segment}"));
                }
            }
            WriteOutcome::Dropped { index } if index == FRAME_LEN => {
                self.log.push("write ran past the modeled frame");
            }
            _ => {}
        }
        self.refresh(&before);
        self.snapshot()
    }

    /// Writes every remaining byte as one batch, then re-evaluates.
    pub fn run_all(&mut self) -> SessionView {
        let before = self.status.clone();
        let summary = writer::write_all(&mut self.frame, &self.plan, &mut self.write, &mut self.rng);
        if summary.written + summary.dropped > 0 {
            let reached = if summary.reached.is_empty() {
                "buffer only".to_string()
            } else {
                summary
                    .reached
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            self.log.push(format!(
                "wrote {} bytes ({} dropped past frame), reached {reached}",
                summary.written, summary.dropped
            ));
        }
        self.refresh(&before);
        self.snapshot()
    }

    /// Replaces the flags and recomputes verdict and phase. The buffer is
    /// not touched.
    pub fn set_mitigations(&mut self, mitigations: Mitigations) -> SessionView {
        let before = self.status.clone();
        self.mitigations = mitigations;
        self.refresh(&before);
        self.snapshot()
    }

    /// Applies the next staged phase immediately.
    pub fn advance_phase(&mut self) -> SessionView {
        if let Some(t) = self.machine.advance_now() {
            self.narrate_transition(t);
        }
        self.snapshot()
    }

    /// Applies the next staged phase if `ticket` is still current.
    ///
    /// Returns the ticket for the following step, if any.
    pub fn advance_staged(&mut self, ticket: StageTicket) -> Option<StageTicket> {
        let t = self.machine.advance(ticket)?;
        self.narrate_transition(t);
        self.machine.pending_ticket()
    }

    /// Applies all staged phases with no delay.
    pub fn settle(&mut self) -> SessionView {
        while let Some(t) = self.machine.advance_now() {
            self.narrate_transition(t);
        }
        self.snapshot()
    }

    /// Read-only view for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SessionView {
        let frame_bytes = self.frame.bytes().to_vec();
        let frame_digest = blake3::hash(&frame_bytes).to_hex().to_string();
        SessionView {
            session_id: self.id,
            generation: self.generation(),
            frame_bytes,
            written_mask: self.write.written_mask().to_vec(),
            cursor: self.write.cursor(),
            plan: self.plan.clone(),
            phase: self.phase(),
            verdict: self.status.verdict,
            verdict_caption: self.status.verdict.caption(self.mitigations).to_string(),
            status: self.status.clone(),
            mitigations: self.mitigations,
            address_captions: status::address_caption(&self.frame, self.mitigations).to_vec(),
            log: self.log.to_vec(),
            frame_digest,
        }
    }

    fn refresh(&mut self, before: &Status) {
        self.status = status::evaluate(&self.frame, &self.snapshot, self.mitigations);
        self.narrate_verdict(before);
        self.settle_write_phase();
    }

    fn settle_write_phase(&mut self) {
        let complete = self.write.is_exhausted(&self.plan);
        if let Some(t) = self.machine.reevaluate(complete, &self.status, self.mitigations) {
            self.narrate_transition(t);
        }
    }

    fn narrate_verdict(&mut self, before: &Status) {
        if before.verdict != self.status.verdict {
            info!(session = %self.id, verdict = ?self.status.verdict, "verdict changed");
            self.log.push(self.status.verdict.caption(self.mitigations));
        }
    }

    fn narrate_transition(&mut self, t: Transition) {
        if t.to.is_terminal() {
            info!(session = %self.id, phase = %t.to, "terminal phase reached");
        }
        let text = match t.to {
            Phase::Write => "writing".to_string(),
            Phase::Check => "checking sentinel before return".to_string(),
            Phase::Return => {
                if self.status.ret_changed {
                    "returning through an altered return address".to_string()
                } else {
                    "returning to caller".to_string()
                }
            }
            Phase::Blocked => format!("{}; call aborted", Verdict::Blocked.caption(self.mitigations)),
            Phase::Done => format!("done: {}", self.status.verdict.caption(self.mitigations)),
        };
        self.log.push(format!("{} -> {}: {text}", t.from, t.to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(pattern: Pattern, length: usize, mitigations: Mitigations) -> Session {
        let config = SimConfig {
            seed: Some(21),
            stage_delay_ms: 0,
            mitigations,
            plan: WritePlan::build(pattern, length),
            ..SimConfig::default()
        };
        Session::new(&config).unwrap()
    }

    #[test]
    fn new_session_starts_in_write() {
        let s = session(Pattern::FixedByte, 24, Mitigations::none());
        let view = s.snapshot();
        assert_eq!(view.phase, Phase::Write);
        assert_eq!(view.cursor, 0);
        assert!(view.written_mask.iter().all(|w| !*w));
        assert_eq!(view.frame_bytes.len(), FRAME_LEN);
        assert_eq!(view.log.len(), 1);
    }

    #[test]
    fn step_reaches_phase_transition_only_at_exhaustion() {
        let mut s = session(Pattern::FixedByte, 2, Mitigations::none());
        assert_eq!(s.step().phase, Phase::Write);
        let view = s.step();
        assert_eq!(view.phase, Phase::Return);
        assert_eq!(s.pending_phases(), vec![Phase::Done]);
    }

    #[test]
    fn step_on_exhausted_plan_is_noop_for_memory() {
        let mut s = session(Pattern::FixedByte, 1, Mitigations::none());
        s.step();
        let before = s.snapshot();
        let after = s.step();
        assert_eq!(before.frame_bytes, after.frame_bytes);
        assert_eq!(before.cursor, after.cursor);
        assert_eq!(before.frame_digest, after.frame_digest);
    }

    #[test]
    fn set_plan_keeps_frame_and_canary() {
        let mut s = session(Pattern::FixedByte, 24, Mitigations::none());
        s.run_all();
        let canary_before = s.frame().read_u64_le(Segment::Canary);
        let snapshot_canary = s.frame_snapshot().canary_u64();

        let view = s.set_plan(Pattern::RepeatingSequence, 8).unwrap();
        assert_eq!(view.phase, Phase::Write);
        assert_eq!(view.cursor, 0);
        assert_eq!(s.frame().read_u64_le(Segment::Canary), canary_before);
        assert_eq!(s.frame_snapshot().canary_u64(), snapshot_canary);
        assert!(view.status.canary_changed);
    }

    #[test]
    fn set_plan_rejects_oversized_length() {
        let mut s = session(Pattern::FixedByte, 24, Mitigations::none());
        let err = s.set_plan(Pattern::FixedByte, 1_000_000).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn set_mitigations_before_completion_keeps_write_phase() {
        let mut s = session(Pattern::FixedByte, 30, Mitigations::none());
        for _ in 0..20 {
            s.step();
        }
        let view = s.set_mitigations(Mitigations::none().with_canary_check(true));
        assert_eq!(view.phase, Phase::Write);
        assert_eq!(view.verdict, Verdict::Blocked);
    }

    #[test]
    fn zero_length_plan_settles_without_writing() {
        let mut s = session(Pattern::FixedByte, 24, Mitigations::none());
        let view = s.set_plan(Pattern::FixedByte, 0).unwrap();
        assert!(view.is_write_complete());
        assert_eq!(view.phase, Phase::Return);
        assert!(view.written_mask.iter().all(|w| !*w));

        let view = s.set_mitigations(Mitigations::none().with_canary_check(true));
        assert_eq!(view.phase, Phase::Return);
        assert_eq!(s.pending_phases(), vec![Phase::Done]);
        assert_eq!(s.settle().phase, Phase::Done);
    }

    #[test]
    fn reset_with_zero_length_plan_settles() {
        let mut s = session(Pattern::FixedByte, 0, Mitigations::none());
        assert_eq!(s.phase(), Phase::Return);
        let view = s.reset(Mitigations::none().with_canary_check(true));
        assert_eq!(view.phase, Phase::Check);
        assert_eq!(view.verdict, Verdict::NoCorruption);
    }

    #[test]
    fn settle_drains_staged_phases() {
        let mut s = session(Pattern::FixedByte, 8, Mitigations::none().with_canary_check(true));
        assert_eq!(s.run_all().phase, Phase::Check);
        let view = s.settle();
        assert_eq!(view.phase, Phase::Done);
        assert_eq!(view.verdict, Verdict::NoCorruption);
    }

    #[test]
    fn advance_staged_rejects_tickets_from_old_generation() {
        let mut s = session(Pattern::FixedByte, 8, Mitigations::none());
        s.run_all();
        let ticket = s.pending_ticket().unwrap();
        s.reset(Mitigations::none());
        assert_eq!(s.advance_staged(ticket), None);
        assert_eq!(s.phase(), Phase::Write);
    }

    #[test]
    fn view_serializes_to_json() {
        let s = session(Pattern::custom("hi"), 4, Mitigations::all());
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["phase"], "write");
        assert_eq!(json["frame_bytes"].as_array().unwrap().len(), FRAME_LEN);
        assert_eq!(json["frame_digest"].as_str().unwrap().len(), 64);
    }
}
