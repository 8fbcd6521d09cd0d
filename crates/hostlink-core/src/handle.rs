//! Call-scoped references to host request state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::gate::{GateError, WaitGate};
use crate::operation::Operation;
use crate::status::{self, Outcome, RawStatus, StatusCode};

/// Opaque host token for a request object.
///
/// The bridge never dereferences it; it is handed back to the host on every
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawRequest(usize);

impl RawRequest {
    /// Wrap a host token.
    pub const fn new(token: usize) -> Self {
        Self(token)
    }

    /// The host token.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// No terminal status recorded yet.
const LIVE: RawStatus = StatusCode::Ok as RawStatus;

struct RequestShared {
    raw: RawRequest,
    gate: WaitGate,
    terminal: AtomicI32,
    finalized: AtomicBool,
}

/// Non-owning reference to a host request, shared by the host callback
/// context and the extension.
///
/// Cloning is cheap and yields a handle to the same request. The host creates
/// the handle when it creates the request and drops its clones when it
/// destroys it; the bridge never frees host state. Once the host has reported
/// the request gone or destroyed, or the extension has finalized it, every
/// further call fails locally without crossing the boundary.
#[derive(Clone)]
pub struct RequestHandle {
    shared: Arc<RequestShared>,
}

/// Host-side token for completing one pending call.
///
/// [`RequestHandle::call_async`] hands it to the host together with the call.
/// It is tied to the arm cycle of that call: once the caller has stopped
/// waiting (on timeout, for example), completing it has no effect even if a
/// later call is waiting on the same request.
#[derive(Clone)]
pub struct Completer {
    handle: RequestHandle,
    generation: u64,
}

impl Completer {
    /// The request the pending call belongs to.
    pub fn request(&self) -> &RequestHandle {
        &self.handle
    }

    /// The arm cycle this completer answers.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver the final status of the pending call.
    ///
    /// Returns `false` if nothing is waiting for this call any more.
    pub fn complete(&self, status: RawStatus) -> bool {
        debug!(
            request = %self.handle.raw(),
            generation = self.generation,
            status,
            "Host completed pending call"
        );
        self.handle.gate().signal(self.generation, status)
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("raw", &self.handle.raw())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Result of [`RequestHandle::call_async`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Final raw status: the call's own, or the one delivered asynchronously.
    pub status: RawStatus,
    /// How long the caller was parked, if the host went pending.
    pub waited: Option<Duration>,
}

impl RequestHandle {
    /// Create the handle for a new host request.
    pub fn new(raw: RawRequest) -> Self {
        Self {
            shared: Arc::new(RequestShared {
                raw,
                gate: WaitGate::new(),
                terminal: AtomicI32::new(LIVE),
                finalized: AtomicBool::new(false),
            }),
        }
    }

    /// The host token.
    pub fn raw(&self) -> RawRequest {
        self.shared.raw
    }

    /// The per-request completion gate.
    pub fn gate(&self) -> &WaitGate {
        &self.shared.gate
    }

    /// Whether both handles refer to the same request.
    pub fn same_request(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The permanent status recorded for this request, if any.
    pub fn terminal_status(&self) -> Option<StatusCode> {
        match self.shared.terminal.load(Ordering::Acquire) {
            LIVE => None,
            raw => StatusCode::from_raw(raw),
        }
    }

    /// Whether the extension has finalized this request.
    pub fn is_finalized(&self) -> bool {
        self.shared.finalized.load(Ordering::Acquire)
    }

    /// Record that the extension finalized this request.
    ///
    /// Returns `false` if it was already finalized.
    pub fn mark_finalized(&self) -> bool {
        !self.shared.finalized.swap(true, Ordering::AcqRel)
    }

    /// Refuse the call locally if the request is known to be unusable.
    pub fn check_live(&self, operation: Operation) -> BridgeResult<()> {
        if self.is_finalized() {
            return Err(BridgeError::Fatal {
                operation,
                status: StatusCode::RequestDestroyed,
            });
        }
        match self.terminal_status() {
            Some(status) => Err(BridgeError::Fatal { operation, status }),
            None => Ok(()),
        }
    }

    /// Translate the status of a synchronous call, latching terminal statuses.
    pub fn settle(&self, operation: Operation, raw: RawStatus) -> BridgeResult<()> {
        self.latch(operation, raw);
        status::expect_sync(operation, raw)
    }

    /// Run a call that may complete asynchronously and present it as blocking.
    ///
    /// The gate is armed before `call` crosses into the host, and `call`
    /// receives the [`Completer`] for this cycle. On `Pending` the current
    /// thread parks until the completer is used (or `timeout` elapses) and the
    /// delivered status is translated; otherwise the gate is released at once
    /// and the returned status is translated.
    pub fn call_async<F>(
        &self,
        operation: Operation,
        timeout: Option<Duration>,
        call: F,
    ) -> BridgeResult<Completion>
    where
        F: FnOnce(Completer) -> RawStatus,
    {
        self.check_live(operation)?;

        let gate = self.gate();
        let ticket = gate
            .arm()
            .map_err(|_| BridgeError::GateBusy { operation })?;

        let completer = Completer {
            handle: self.clone(),
            generation: ticket.generation(),
        };
        let raw = call(completer);
        self.latch(operation, raw);

        match status::translate(operation, raw) {
            Ok(Outcome::Pending) => {
                let started = Instant::now();
                debug!(request = %self.raw(), %operation, "Waiting for host completion");

                let delivered = gate.wait(ticket, timeout).map_err(|err| match err {
                    GateError::TimedOut(limit) => {
                        warn!(request = %self.raw(), %operation, ?limit, "Host completion timed out");
                        BridgeError::WaitTimedOut {
                            operation,
                            timeout: limit,
                        }
                    }
                    GateError::Busy | GateError::StaleTicket(_) => {
                        BridgeError::GateBusy { operation }
                    }
                })?;

                let waited = started.elapsed();
                self.latch(operation, delivered);
                status::expect_sync(operation, delivered)?;
                Ok(Completion {
                    status: delivered,
                    waited: Some(waited),
                })
            }
            Ok(Outcome::Proceed) => {
                if let Some(raced) = gate.release(ticket) {
                    debug!(request = %self.raw(), %operation, raced, "Completion raced ahead of return");
                }
                Ok(Completion {
                    status: raw,
                    waited: None,
                })
            }
            Err(err) => {
                let _ = gate.release(ticket);
                Err(err)
            }
        }
    }

    fn latch(&self, operation: Operation, raw: RawStatus) {
        if let Some(status) = StatusCode::from_raw(raw).filter(|s| s.is_terminal()) {
            let first = self
                .shared
                .terminal
                .compare_exchange(LIVE, raw, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if first {
                warn!(request = %self.raw(), %operation, %status, "Request is no longer usable");
            }
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("raw", &self.raw())
            .field("terminal", &self.terminal_status())
            .field("finalized", &self.is_finalized())
            .field("gate", &self.gate().phase())
            .finish()
    }
}
