//! Error types for hostlink.
//!
//! Errors fall in three groups:
//!
//! - boundary failures reported by the host (`Fatal`, `UnknownStatus`,
//!   `UnexpectedPending`, `WaitTimedOut`), which abort the current operation;
//! - local failures decoding or encoding data (`Decode`, `Metadata`), which the
//!   caller may recover from;
//! - local misuse (`GateBusy`, `LimitExceeded`).

use std::str::Utf8Error;
use std::time::Duration;

use thiserror::Error;

use crate::operation::Operation;
use crate::status::{RawStatus, StatusCode};

/// Top-level error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The host reported a status that makes the request unsafe to touch.
    #[error("{operation} aborted by host: {status}")]
    Fatal {
        /// The operation that was aborted.
        operation: Operation,
        /// The fatal status.
        status: StatusCode,
    },

    /// The host returned a status outside its ABI.
    #[error("{operation} returned unknown host status {raw}")]
    UnknownStatus {
        /// The operation that was aborted.
        operation: Operation,
        /// The raw value.
        raw: RawStatus,
    },

    /// A synchronous-only operation was answered with `Pending`.
    #[error("{operation} is synchronous but the host reported pending")]
    UnexpectedPending {
        /// The operation that was aborted.
        operation: Operation,
    },

    /// The host did not complete a pending operation in time.
    #[error("{operation} timed out after {timeout:?} waiting for host completion")]
    WaitTimedOut {
        /// The operation that was aborted.
        operation: Operation,
        /// The configured wait limit.
        timeout: Duration,
    },

    /// Another asynchronous call is already outstanding on this request.
    #[error("{operation} started while another host call is pending on the same request")]
    GateBusy {
        /// The operation that could not start.
        operation: Operation,
    },

    /// The host asked for a destination larger than the configured limit.
    #[error("{operation} needs {requested} bytes, limit is {limit} bytes")]
    LimitExceeded {
        /// The operation that was refused.
        operation: Operation,
        /// Requested size in bytes.
        requested: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The host filled a destination the bridge could not decode.
    #[error("{operation} returned malformed data: {source}")]
    Decode {
        /// The operation whose result was malformed.
        operation: Operation,
        /// What was wrong with it.
        #[source]
        source: DecodeError,
    },

    /// A structured metadata value could not be encoded or decoded.
    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] MetadataError),
}

impl BridgeError {
    /// Whether this error means the boundary contract was violated and the
    /// caller must stop using the request in the current call chain.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Fatal { .. }
                | BridgeError::UnknownStatus { .. }
                | BridgeError::UnexpectedPending { .. }
                | BridgeError::WaitTimedOut { .. }
        )
    }

    /// The host status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BridgeError::Fatal { status, .. } => Some(*status),
            BridgeError::UnexpectedPending { .. } => Some(StatusCode::Pending),
            _ => None,
        }
    }

    /// The operation this error belongs to, if known.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            BridgeError::Fatal { operation, .. }
            | BridgeError::UnknownStatus { operation, .. }
            | BridgeError::UnexpectedPending { operation }
            | BridgeError::WaitTimedOut { operation, .. }
            | BridgeError::GateBusy { operation }
            | BridgeError::LimitExceeded { operation, .. }
            | BridgeError::Decode { operation, .. } => Some(*operation),
            BridgeError::Metadata(_) => None,
        }
    }
}

/// Malformed data in a host-filled destination.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A descriptor points outside the backing region.
    #[error("descriptor {index} spans {offset}..{end} outside a {region}-byte region")]
    DescriptorOutOfBounds {
        /// Descriptor slot index.
        index: usize,
        /// Start offset.
        offset: usize,
        /// End offset (exclusive).
        end: usize,
        /// Backing region length.
        region: usize,
    },

    /// A descriptor references bytes that are not valid UTF-8.
    #[error("descriptor {index} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        /// Descriptor slot index.
        index: usize,
        /// The UTF-8 error.
        #[source]
        source: Utf8Error,
    },

    /// A borrowed host string was not valid UTF-8.
    #[error("host string is not valid UTF-8: {0}")]
    HostString(#[source] Utf8Error),
}

/// Failures converting structured metadata to or from its wire encoding.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The value could not be represented as a structured value.
    #[error("value is not representable: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The host produced a number JSON cannot represent.
    #[error("non-finite number {0} in metadata")]
    NonFiniteNumber(f64),

    /// The host produced bytes that are not a valid structured value.
    #[error("invalid wire encoding: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Errors loading a [`BridgeConfig`](crate::config::BridgeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
