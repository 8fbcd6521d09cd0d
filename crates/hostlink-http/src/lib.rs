//! Hostlink HTTP - Extension-Facing Request API
//!
//! This crate is what extension logic programs against:
//!
//! - [`HttpBridge`]: binds a host implementation to configuration, metrics
//!   and events
//! - [`HttpRequest`]: every operation on one in-flight request
//! - [`HeaderCollection`]: headers and trailers decoded from one bulk copy
//! - [`LocalReply`]: a synthesized response
//! - [`metadata`]: conversion between `serde_json` values and the host's
//!   structured-value encoding
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hostlink_capi::{FilterStatus, MemoryHost, RequestSnapshot};
//! use hostlink_http::HttpBridge;
//!
//! let host = Arc::new(MemoryHost::new());
//! let handle = host.register(
//!     RequestSnapshot::new()
//!         .with_header("cookie", "a=1")
//!         .with_header("cookie", "b=2"),
//! );
//!
//! let request = HttpBridge::new(host.clone()).request(handle);
//! let (count, bytes) = host.headers_size(request.handle()).unwrap();
//! let headers = request.copy_headers(count, bytes).unwrap();
//! assert_eq!(headers.get_all("cookie"), ["a=1", "b=2"]);
//!
//! request.set_header("x-checked", "1").unwrap();
//! request.continue_request(FilterStatus::Continue).unwrap();
//! ```
//!
//! Every operation returns a [`BridgeResult`](hostlink_core::BridgeResult).
//! Errors for which [`is_fatal`](hostlink_core::BridgeError::is_fatal) is true
//! mean the request must not be used further in the current callback.

pub mod bridge;
pub mod buffer;
pub mod headers;
pub mod metadata;
pub mod reply;
pub mod request;

pub use bridge::HttpBridge;
pub use headers::{HeaderCollection, decode_pairs};
pub use reply::{LocalReply, NO_GRPC_STATUS};
pub use request::{FinalizeGuard, HttpRequest};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bridge::HttpBridge;
    pub use crate::headers::HeaderCollection;
    pub use crate::reply::LocalReply;
    pub use crate::request::{FinalizeGuard, HttpRequest};
}
