//! One-shot completion gate.
//!
//! A boundary call that may complete asynchronously arms the gate before it
//! crosses into the host. If the host answers `Pending`, the caller parks on
//! the gate until a host thread delivers the completion; otherwise the caller
//! releases the gate straight away. The completion may arrive at any point
//! after arming, including before the call returns or before the caller starts
//! waiting, so the gate keeps the delivered status until it is consumed.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{trace, warn};

use crate::status::RawStatus;

/// Observable state of a [`WaitGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// No completion is expected.
    Idle,
    /// One completion is expected and has not arrived.
    Armed,
    /// The completion arrived and has not been consumed.
    Satisfied,
}

/// Proof of a successful [`WaitGate::arm`]; consumed by `wait` or `release`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an armed gate must be waited on or released"]
pub struct GateTicket {
    generation: u64,
}

impl GateTicket {
    /// The arm cycle this ticket belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Errors from the gate itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// The gate is already armed or holds an unconsumed completion.
    #[error("gate is already armed")]
    Busy,

    /// No completion arrived before the deadline. The gate has been disarmed.
    #[error("no completion after {0:?}")]
    TimedOut(Duration),

    /// The ticket does not belong to the current arm cycle.
    #[error("ticket from generation {0} is stale")]
    StaleTicket(u64),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Idle,
    Armed,
    Satisfied(RawStatus),
}

#[derive(Debug)]
struct GateState {
    slot: Slot,
    generation: u64,
}

/// Per-request completion cell.
///
/// State moves `Idle → Armed → Satisfied → Idle`, or `Armed → Idle` when the
/// caller releases a call that completed synchronously or gives up waiting.
/// Each arm starts a new generation. A ticket can only settle its own cycle,
/// and a completion is delivered with the generation it answers.
#[derive(Debug)]
pub struct WaitGate {
    state: Mutex<GateState>,
    completed: Condvar,
}

impl Default for WaitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                slot: Slot::Idle,
                generation: 0,
            }),
            completed: Condvar::new(),
        }
    }

    /// Expect exactly one completion.
    pub fn arm(&self) -> Result<GateTicket, GateError> {
        let mut state = self.state.lock();
        if !matches!(state.slot, Slot::Idle) {
            return Err(GateError::Busy);
        }
        state.generation = state.generation.wrapping_add(1);
        state.slot = Slot::Armed;
        trace!(generation = state.generation, "Gate armed");
        Ok(GateTicket {
            generation: state.generation,
        })
    }

    /// Deliver the completion of arm cycle `generation`. Called by the host,
    /// usually from its own thread.
    ///
    /// Returns `false` if that cycle is not the one armed, or its completion
    /// already arrived; the status is dropped.
    pub fn signal(&self, generation: u64, status: RawStatus) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            warn!(
                generation,
                current = state.generation,
                status,
                "Dropping completion for a finished cycle"
            );
            return false;
        }
        match state.slot {
            Slot::Armed => {
                state.slot = Slot::Satisfied(status);
                trace!(generation = state.generation, status, "Gate satisfied");
                self.completed.notify_all();
                true
            }
            Slot::Idle => {
                warn!(
                    generation = state.generation,
                    status, "Dropping completion for an idle gate"
                );
                false
            }
            Slot::Satisfied(previous) => {
                warn!(
                    generation = state.generation,
                    status, previous, "Dropping duplicate completion"
                );
                false
            }
        }
    }

    /// Settle a cycle whose call did not go pending.
    ///
    /// Returns the status of a completion that raced ahead of the release, if
    /// any. Releasing twice, or with a stale ticket, is a no-op.
    pub fn release(&self, ticket: GateTicket) -> Option<RawStatus> {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            return None;
        }
        let raced = match state.slot {
            Slot::Satisfied(status) => Some(status),
            Slot::Armed | Slot::Idle => None,
        };
        state.slot = Slot::Idle;
        trace!(generation = ticket.generation, ?raced, "Gate released");
        raced
    }

    /// Block until the completion for `ticket` arrives, then consume it.
    ///
    /// With a timeout, the gate is disarmed on expiry. The late completion is
    /// dropped by [`signal`](Self::signal), including after the gate has been
    /// armed again for a later cycle.
    pub fn wait(&self, ticket: GateTicket, timeout: Option<Duration>) -> Result<RawStatus, GateError> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        let mut state = self.state.lock();

        loop {
            if state.generation != ticket.generation {
                return Err(GateError::StaleTicket(ticket.generation));
            }

            match state.slot {
                Slot::Satisfied(status) => {
                    state.slot = Slot::Idle;
                    return Ok(status);
                }
                Slot::Idle => return Err(GateError::StaleTicket(ticket.generation)),
                Slot::Armed => {}
            }

            match deadline {
                None => self.completed.wait(&mut state),
                Some((limit, at)) => {
                    if self.completed.wait_until(&mut state, at).timed_out()
                        && matches!(state.slot, Slot::Armed)
                        && state.generation == ticket.generation
                    {
                        state.slot = Slot::Idle;
                        return Err(GateError::TimedOut(limit));
                    }
                }
            }
        }
    }

    /// Current phase.
    pub fn phase(&self) -> GatePhase {
        match self.state.lock().slot {
            Slot::Idle => GatePhase::Idle,
            Slot::Armed => GatePhase::Armed,
            Slot::Satisfied(_) => GatePhase::Satisfied,
        }
    }

    /// Number of arm cycles so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
