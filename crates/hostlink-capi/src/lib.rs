//! Hostlink CAPI - Host Operation Set
//!
//! This crate defines the boundary between extension logic and the native
//! host that owns HTTP requests:
//!
//! - [`HttpCapi`]: one method per boundary operation, each reporting a raw
//!   host status
//! - [`types`]: the ABI-level value types (actions, ids, descriptors and
//!   call-scoped destinations)
//! - [`MemoryHost`]: an in-process host used by tests and tooling
//!
//! With the `mock` feature, `MockHttpCapi` is generated for downstream tests.

pub mod api;
pub mod error;
pub mod memory;
pub mod types;

pub use api::{HttpCapi, SharedCapi, flatten_pairs, unflatten_pairs};
#[cfg(any(test, feature = "mock"))]
pub use api::MockHttpCapi;
pub use error::{HostError, HostResult};
pub use memory::{Liveness, MemoryHost, MetadataDelivery, RecordedReply, RequestSnapshot};
pub use types::{
    AsyncBuffer, BufferAction, BufferId, FilterStatus, FinalizeReason, HeaderAction, HostString,
    SliceDescriptor, StringValueId,
};
