//! Timer-driven staged phase advancement.
//!
//! [`StagedSession`] wraps a [`Session`] behind a mutex and runs a worker
//! thread that applies pending `Check`/`Return`/`Done` steps after a fixed
//! delay. Every operation that changes the session hands the worker a new
//! [`StageTicket`]; a reset or plan rebuild makes earlier tickets stale, so
//! a step scheduled for an old generation can never land on a new one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::config::SimConfig;
use crate::error::{SchedulerError, SimError, SimResult};
use crate::phase::{Phase, StageTicket};
use crate::plan::Pattern;
use crate::session::{Session, SessionView};
use crate::status::Mitigations;

/// Phase events kept for `wait_for_phase`; newer ones are dropped when full.
const EVENT_BACKLOG: usize = 16;

/// Emitted by the worker after each applied stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEvent {
    /// Generation the stage belonged to.
    pub generation: u64,
    /// Phase entered.
    pub phase: Phase,
}

enum StageMsg {
    Schedule(StageTicket),
    Cancel,
}

/// A session whose staged phases advance on their own.
pub struct StagedSession {
    session: Arc<Mutex<Session>>,
    tx: Option<Sender<StageMsg>>,
    events: Receiver<PhaseEvent>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StagedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedSession").finish_non_exhaustive()
    }
}

impl StagedSession {
    /// Builds the session and starts the stage worker.
    pub fn new(config: &SimConfig) -> SimResult<Self> {
        let session = Arc::new(Mutex::new(Session::new(config)?));
        let delay = Duration::from_millis(config.stage_delay_ms);

        let (tx, rx) = bounded::<StageMsg>(64);
        let (event_tx, events) = bounded::<PhaseEvent>(EVENT_BACKLOG);

        let worker_session = Arc::clone(&session);
        let join = thread::Builder::new()
            .name("stackframe-stager".to_string())
            .spawn(move || worker_loop(&worker_session, delay, &rx, &event_tx))
            .map_err(|e| SimError::internal(format!("failed to spawn stager: {e}")))?;

        let staged = Self {
            session,
            tx: Some(tx),
            events,
            join: Some(join),
        };
        // A zero-length starting plan has stages queued already.
        let ticket = staged.lock()?.pending_ticket();
        if let Some(ticket) = ticket {
            staged.send(StageMsg::Schedule(ticket))?;
        }
        Ok(staged)
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| SimError::internal("session lock poisoned"))
    }

    fn send(&self, msg: StageMsg) -> SimResult<()> {
        let tx = self.tx.as_ref().ok_or(SchedulerError::Disconnected)?;
        tx.send(msg).map_err(|_| SchedulerError::Disconnected)?;
        Ok(())
    }

    /// Runs `op` on the session under the lock, then reschedules the worker
    /// from the session's pending ticket.
    fn apply<T>(&self, op: impl FnOnce(&mut Session) -> T) -> SimResult<T> {
        let (out, ticket) = {
            let mut session = self.lock()?;
            let out = op(&mut session);
            (out, session.pending_ticket())
        };
        match ticket {
            Some(ticket) => self.send(StageMsg::Schedule(ticket))?,
            None => self.send(StageMsg::Cancel)?,
        }
        Ok(out)
    }

    /// See [`Session::reset`].
    pub fn reset(&self, mitigations: Mitigations) -> SimResult<SessionView> {
        self.apply(|s| s.reset(mitigations))
    }

    /// See [`Session::set_plan`].
    pub fn set_plan(&self, pattern: Pattern, length: usize) -> SimResult<SessionView> {
        self.apply(|s| s.set_plan(pattern, length))?
    }

    /// See [`Session::step`].
    pub fn step(&self) -> SimResult<SessionView> {
        self.apply(Session::step)
    }

    /// See [`Session::run_all`].
    pub fn run_all(&self) -> SimResult<SessionView> {
        self.apply(Session::run_all)
    }

    /// See [`Session::set_mitigations`].
    pub fn set_mitigations(&self, mitigations: Mitigations) -> SimResult<SessionView> {
        self.apply(|s| s.set_mitigations(mitigations))
    }

    /// Current view.
    pub fn snapshot(&self) -> SimResult<SessionView> {
        Ok(self.lock()?.snapshot())
    }

    /// Blocks until the worker enters `phase` or `timeout` passes.
    pub fn wait_for_phase(&self, phase: Phase, timeout: Duration) -> SimResult<SessionView> {
        let deadline = Instant::now() + timeout;
        loop {
            let view = self.snapshot()?;
            if view.phase == phase {
                return Ok(view);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    let view = self.snapshot()?;
                    if view.phase == phase {
                        return Ok(view);
                    }
                    return Err(SchedulerError::Timeout {
                        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                    .into());
                }
                Err(RecvTimeoutError::Disconnected) => return Err(SchedulerError::Disconnected.into()),
            }
        }
    }
}

impl Drop for StagedSession {
    fn drop(&mut self) {
        // Closing the channel stops the worker.
        drop(self.tx.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn worker_loop(
    session: &Mutex<Session>,
    delay: Duration,
    rx: &Receiver<StageMsg>,
    events: &Sender<PhaseEvent>,
) {
    let mut scheduled: Option<(StageTicket, Instant)> = None;
    loop {
        let msg = match scheduled {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some((_, due)) => rx.recv_timeout(due.saturating_duration_since(Instant::now())),
        };

        match msg {
            Ok(StageMsg::Schedule(ticket)) => {
                if scheduled.map(|(t, _)| t) != Some(ticket) {
                    scheduled = Some((ticket, Instant::now() + delay));
                }
            }
            Ok(StageMsg::Cancel) => scheduled = None,
            Err(RecvTimeoutError::Timeout) => {
                let Some((ticket, _)) = scheduled.take() else {
                    continue;
                };
                let Ok(mut guard) = session.lock() else {
                    break;
                };
                let next = guard.advance_staged(ticket);
                let event = PhaseEvent {
                    generation: guard.generation(),
                    phase: guard.phase(),
                };
                drop(guard);

                debug!(?ticket, phase = %event.phase, "stage worker tick");
                let _ = events.try_send(event);
                scheduled = next.map(|t| (t, Instant::now() + delay));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
