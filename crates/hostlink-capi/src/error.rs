//! Error types for the in-memory host.

use thiserror::Error;

use hostlink_core::RawRequest;

use crate::types::BufferId;

/// Errors from inspecting or configuring a [`MemoryHost`](crate::MemoryHost).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    /// The request was never registered with this host.
    #[error("Unknown request: {0}")]
    UnknownRequest(RawRequest),

    /// The request has no buffer with this id.
    #[error("Unknown buffer {buffer} on request {request}")]
    UnknownBuffer {
        /// The request.
        request: RawRequest,
        /// The missing buffer.
        buffer: BufferId,
    },
}

/// Result type for in-memory host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;
