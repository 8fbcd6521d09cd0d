//! Host status codes and their translation into typed outcomes.
//!
//! Every boundary call returns a raw integer status. This module is the single
//! place where those integers are classified: success, "pending" (the host
//! accepted the call and will complete it from another thread), or one of the
//! fatal conditions that make the request unsafe to touch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::operation::Operation;

/// Raw status code as returned by the host.
pub type RawStatus = i32;

/// Typed view of a host status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum StatusCode {
    /// The operation succeeded.
    Ok = 0,
    /// The request was finished or reset concurrently.
    RequestGone = -1,
    /// The request object has been destroyed.
    RequestDestroyed = -2,
    /// The call was made outside a valid extension callback.
    InvalidContext = -3,
    /// The call is not allowed in the current processing phase.
    WrongPhase = -4,
    /// The operation was accepted and will complete asynchronously.
    Pending = -5,
}

impl StatusCode {
    /// Classify a raw host status. Returns `None` for values the host ABI does
    /// not define.
    pub fn from_raw(raw: RawStatus) -> Option<Self> {
        match raw {
            0 => Some(StatusCode::Ok),
            -1 => Some(StatusCode::RequestGone),
            -2 => Some(StatusCode::RequestDestroyed),
            -3 => Some(StatusCode::InvalidContext),
            -4 => Some(StatusCode::WrongPhase),
            -5 => Some(StatusCode::Pending),
            _ => None,
        }
    }

    /// The raw value the host uses for this status.
    pub fn as_raw(self) -> RawStatus {
        self as RawStatus
    }

    /// Whether this status aborts the current operation.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            StatusCode::RequestGone
                | StatusCode::RequestDestroyed
                | StatusCode::InvalidContext
                | StatusCode::WrongPhase
        )
    }

    /// Whether this status means the request object can never be used again.
    ///
    /// `InvalidContext` and `WrongPhase` depend on where the call was made;
    /// `RequestGone` and `RequestDestroyed` are permanent.
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusCode::RequestGone | StatusCode::RequestDestroyed)
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::RequestGone => "request_gone",
            StatusCode::RequestDestroyed => "request_destroyed",
            StatusCode::InvalidContext => "invalid_context",
            StatusCode::WrongPhase => "wrong_phase",
            StatusCode::Pending => "pending",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal result of a boundary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call completed; carry on.
    Proceed,
    /// The call was accepted; the caller must wait for the host completion.
    Pending,
}

/// Translate a raw status into an [`Outcome`] or a fatal [`BridgeError`].
pub fn translate(operation: Operation, raw: RawStatus) -> BridgeResult<Outcome> {
    match StatusCode::from_raw(raw) {
        Some(StatusCode::Ok) => Ok(Outcome::Proceed),
        Some(StatusCode::Pending) => Ok(Outcome::Pending),
        Some(status) => Err(BridgeError::Fatal { operation, status }),
        None => Err(BridgeError::UnknownStatus { operation, raw }),
    }
}

/// Translate the status of an operation that must complete synchronously.
pub fn expect_sync(operation: Operation, raw: RawStatus) -> BridgeResult<()> {
    match translate(operation, raw)? {
        Outcome::Proceed => Ok(()),
        Outcome::Pending => Err(BridgeError::UnexpectedPending { operation }),
    }
}
