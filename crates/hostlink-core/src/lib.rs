//! Hostlink Core - Status, Handles and Completion Gates
//!
//! This crate holds the pieces of the bridge that do not depend on any
//! particular host operation set:
//!
//! - [`StatusCode`] and [`translate`]: classification of raw host statuses
//! - [`RequestHandle`]: the call-scoped reference to a host request
//! - [`WaitGate`]: the one-shot cell that turns an asynchronous host
//!   completion into a blocking call
//! - [`BridgeConfig`]: limits and timeouts shared by every operation
//!
//! # Quick Start
//!
//! ```
//! use hostlink_core::prelude::*;
//!
//! let handle = RequestHandle::new(RawRequest::new(0x1000));
//!
//! // A host call that answers "pending" and completes straight away.
//! let completion = handle
//!     .call_async(Operation::GetDynamicMetadata, None, |completer| {
//!         completer.complete(StatusCode::Ok.as_raw());
//!         StatusCode::Pending.as_raw()
//!     })
//!     .unwrap();
//!
//! assert_eq!(completion.status, 0);
//! ```
//!
//! # Failure Model
//!
//! The host can report that a request is gone, destroyed, or being used in the
//! wrong context or phase. These statuses abort the operation with a fatal
//! [`BridgeError`]. `RequestGone` and `RequestDestroyed` are also latched on
//! the handle so that later calls fail without reaching the host.

pub mod config;
pub mod error;
pub mod gate;
pub mod handle;
pub mod operation;
pub mod status;

// Re-export main types at crate root
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ConfigError, ConfigResult, DecodeError, MetadataError};
pub use gate::{GateError, GatePhase, GateTicket, WaitGate};
pub use handle::{Completer, Completion, RawRequest, RequestHandle};
pub use operation::Operation;
pub use status::{Outcome, RawStatus, StatusCode, expect_sync, translate};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```ignore
/// use hostlink_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::handle::{Completer, Completion, RawRequest, RequestHandle};
    pub use crate::operation::Operation;
    pub use crate::status::{RawStatus, StatusCode};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_destroyed_request_stops_async_flow() {
        let handle = RequestHandle::new(RawRequest::new(0x2000));
        let config = BridgeConfig::strict();

        let err = handle
            .call_async(
                Operation::GetDynamicMetadata,
                config.metadata_wait_timeout,
                |completer| {
                    completer.complete(StatusCode::RequestDestroyed.as_raw());
                    StatusCode::Pending.as_raw()
                },
            )
            .unwrap_err();
        assert!(err.is_fatal());

        // Nothing crosses the boundary any more.
        let mut crossed = false;
        let err = handle
            .call_async(
                Operation::GetDynamicMetadata,
                Some(Duration::from_millis(1)),
                |_| {
                    crossed = true;
                    0
                },
            )
            .unwrap_err();
        assert!(!crossed);
        assert_eq!(err.status(), Some(StatusCode::RequestDestroyed));
    }
}
