//! Phase state machine for the simulated call/return sequence.
//!
//! `Write` lasts until the plan is exhausted. Completion picks a route:
//!
//! - canary check on and canary changed: `Blocked` (terminal)
//! - canary check on otherwise: `Check -> Return -> Done`
//! - canary check off: `Return -> Done`
//!
//! The first phase of a route is entered immediately; the rest are staged
//! and applied one at a time by [`PhaseMachine::advance`]. Each staged step
//! is authorized by a [`StageTicket`]; any reset, route change or advance
//! invalidates outstanding tickets.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::status::{Mitigations, Status, Verdict};

/// Stage of the simulated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Plan bytes are still being written.
    Write,
    /// Sentinel is being compared before return.
    Check,
    /// Function returns through the saved return address.
    Return,
    /// Sentinel check failed; the call never returns.
    Blocked,
    /// Sequence finished.
    Done,
}

impl Phase {
    /// `Blocked` and `Done` accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Blocked | Self::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Write => "write",
            Self::Check => "check",
            Self::Return => "return",
            Self::Blocked => "blocked",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Path taken after the write phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `Check -> Return -> Done`.
    Checked,
    /// `Return -> Done`.
    Unchecked,
    /// `Blocked`.
    Blocked,
}

impl Route {
    /// Chooses the route from the current status and flags.
    ///
    /// Blocking follows the first verdict rule: canary check on and canary
    /// changed.
    #[must_use]
    pub fn select(status: &Status, mitigations: Mitigations) -> Self {
        if status.verdict == Verdict::Blocked {
            Self::Blocked
        } else if mitigations.canary_check_enabled {
            Self::Checked
        } else {
            Self::Unchecked
        }
    }

    /// Phases of the route, in order.
    #[must_use]
    pub const fn phases(self) -> &'static [Phase] {
        match self {
            Self::Checked => &[Phase::Check, Phase::Return, Phase::Done],
            Self::Unchecked => &[Phase::Return, Phase::Done],
            Self::Blocked => &[Phase::Blocked],
        }
    }
}

/// Authorization for one staged step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageTicket {
    /// Session generation the ticket was issued in.
    pub generation: u64,
    /// Machine revision the ticket was issued at.
    pub seq: u64,
}

/// A phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Phase before.
    pub from: Phase,
    /// Phase after.
    pub to: Phase,
}

/// Phase state for one frame + plan pairing.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    route: Option<Route>,
    pending: VecDeque<Phase>,
    generation: u64,
    seq: u64,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    /// Starts in `Write`, generation 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Write,
            route: None,
            pending: VecDeque::new(),
            generation: 0,
            seq: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Route chosen at write completion; `None` while still writing.
    #[must_use]
    pub const fn route(&self) -> Option<Route> {
        self.route
    }

    /// Generation number; bumped by every [`PhaseMachine::reset`].
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Staged phases not yet applied.
    #[must_use]
    pub fn pending(&self) -> Vec<Phase> {
        self.pending.iter().copied().collect()
    }

    /// Ticket for the next staged step, if one is pending.
    #[must_use]
    pub fn pending_ticket(&self) -> Option<StageTicket> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.ticket())
        }
    }

    fn ticket(&self) -> StageTicket {
        StageTicket {
            generation: self.generation,
            seq: self.seq,
        }
    }

    /// Back to `Write` in a new generation. Outstanding tickets go stale.
    pub fn reset(&mut self) {
        self.phase = Phase::Write;
        self.route = None;
        self.pending.clear();
        self.generation += 1;
        self.seq = 0;
    }

    /// Recomputes the phase from write completion, status and flags.
    ///
    /// Before completion this is a no-op. At first completion the route's
    /// first phase is entered and the rest are staged. Afterwards, if the
    /// route changes and the current phase is not on the new route, the
    /// new route restarts from the write-completion boundary.
    pub fn reevaluate(
        &mut self,
        write_complete: bool,
        status: &Status,
        mitigations: Mitigations,
    ) -> Option<Transition> {
        if !write_complete {
            return None;
        }

        let route = Route::select(status, mitigations);
        if self.route == Some(route) {
            return None;
        }

        let phases = route.phases();
        let from = self.phase;
        let resume_at = if self.route.is_some() {
            phases.iter().position(|p| *p == self.phase)
        } else {
            None
        };

        self.route = Some(route);
        self.seq += 1;
        self.pending.clear();

        match resume_at {
            Some(idx) => {
                self.pending.extend(phases[idx + 1..].iter().copied());
                debug!(phase = %self.phase, ?route, "route changed; current phase kept");
                None
            }
            None => {
                self.phase = phases[0];
                self.pending.extend(phases[1..].iter().copied());
                info!(from = %from, to = %self.phase, ?route, "write phase settled");
                Some(Transition {
                    from,
                    to: self.phase,
                })
            }
        }
    }

    /// Applies the next staged phase if `ticket` is current.
    ///
    /// Stale tickets and empty queues are ignored.
    pub fn advance(&mut self, ticket: StageTicket) -> Option<Transition> {
        if ticket != self.ticket() {
            warn!(?ticket, current = ?self.ticket(), "stale stage ticket discarded");
            return None;
        }
        self.advance_now()
    }

    /// Applies the next staged phase unconditionally.
    pub fn advance_now(&mut self) -> Option<Transition> {
        let next = self.pending.pop_front()?;
        let from = self.phase;
        self.phase = next;
        self.seq += 1;
        debug!(from = %from, to = %next, generation = self.generation, "staged phase applied");
        Some(Transition { from, to: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(canary_changed: bool, mitigations: Mitigations) -> Status {
        let mut s = Status {
            canary_changed,
            rbp_changed: false,
            ret_changed: false,
            changed_bytes: Vec::new(),
            verdict: Verdict::NoCorruption,
        };
        s.verdict = crate::status::classify(&s, mitigations);
        s
    }

    fn drain(machine: &mut PhaseMachine) -> Vec<Phase> {
        let mut seen = vec![machine.phase()];
        while let Some(t) = machine.advance_now() {
            seen.push(t.to);
        }
        seen
    }

    #[test]
    fn stays_in_write_until_complete() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        assert_eq!(m.reevaluate(false, &status(true, on), on), None);
        assert_eq!(m.phase(), Phase::Write);
        assert!(m.pending_ticket().is_none());
    }

    #[test]
    fn checked_route_runs_check_return_done() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        let t = m.reevaluate(true, &status(false, on), on).unwrap();
        assert_eq!(t, Transition { from: Phase::Write, to: Phase::Check });
        assert_eq!(drain(&mut m), vec![Phase::Check, Phase::Return, Phase::Done]);
        assert!(m.phase().is_terminal());
    }

    #[test]
    fn unchecked_route_skips_check() {
        let mut m = PhaseMachine::new();
        let off = Mitigations::none();
        m.reevaluate(true, &status(true, off), off);
        assert_eq!(drain(&mut m), vec![Phase::Return, Phase::Done]);
    }

    #[test]
    fn failed_check_blocks_with_nothing_pending() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        m.reevaluate(true, &status(true, on), on);
        assert_eq!(m.phase(), Phase::Blocked);
        assert!(m.pending_ticket().is_none());
        assert_eq!(m.advance_now(), None);
    }

    #[test]
    fn enabling_check_after_done_blocks() {
        let mut m = PhaseMachine::new();
        let off = Mitigations::none();
        m.reevaluate(true, &status(true, off), off);
        drain(&mut m);
        assert_eq!(m.phase(), Phase::Done);

        let on = off.with_canary_check(true);
        let t = m.reevaluate(true, &status(true, on), on).unwrap();
        assert_eq!(t, Transition { from: Phase::Done, to: Phase::Blocked });
    }

    #[test]
    fn disabling_check_unblocks_into_return() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        m.reevaluate(true, &status(true, on), on);
        assert_eq!(m.phase(), Phase::Blocked);

        let off = Mitigations::none();
        m.reevaluate(true, &status(true, off), off);
        assert_eq!(drain(&mut m), vec![Phase::Return, Phase::Done]);
    }

    #[test]
    fn route_change_keeps_phase_on_shared_suffix() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        m.reevaluate(true, &status(false, on), on);
        m.advance_now();
        assert_eq!(m.phase(), Phase::Return);

        let off = Mitigations::none();
        assert_eq!(m.reevaluate(true, &status(false, off), off), None);
        assert_eq!(m.phase(), Phase::Return);
        assert_eq!(m.pending(), vec![Phase::Done]);
    }

    #[test]
    fn stale_tickets_are_ignored() {
        let mut m = PhaseMachine::new();
        let off = Mitigations::none();
        m.reevaluate(true, &status(false, off), off);
        let ticket = m.pending_ticket().unwrap();

        m.reset();
        assert_eq!(m.advance(ticket), None);
        assert_eq!(m.phase(), Phase::Write);
    }

    #[test]
    fn ticket_is_single_use() {
        let mut m = PhaseMachine::new();
        let on = Mitigations::none().with_canary_check(true);
        m.reevaluate(true, &status(false, on), on);
        let ticket = m.pending_ticket().unwrap();
        assert!(m.advance(ticket).is_some());
        assert_eq!(m.advance(ticket), None);
        assert_eq!(m.phase(), Phase::Return);
    }

    #[test]
    fn reset_bumps_generation() {
        let mut m = PhaseMachine::new();
        let g = m.generation();
        m.reset();
        assert_eq!(m.generation(), g + 1);
        assert_eq!(m.route(), None);
    }
}
