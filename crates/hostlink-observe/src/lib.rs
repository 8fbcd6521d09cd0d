//! Hostlink Observability
//!
//! This crate records what happens at the boundary between extension logic
//! and the host:
//!
//! - [`MetricsCollector`]: per-operation call counts, host statuses, pending
//!   waits and bytes moved
//! - [`EventDispatcher`]: observable event system for bridge calls
//!
//! # Metrics Collection
//!
//! ```
//! use std::time::Duration;
//! use hostlink_core::Operation;
//! use hostlink_observe::MetricsCollector;
//!
//! let collector = MetricsCollector::new();
//! collector.record_call(Operation::SetHeader, Duration::from_micros(4));
//! collector.record_status(0);
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.total_calls(), 1);
//! ```
//!
//! # Event Subscription
//!
//! ```
//! use hostlink_core::RawRequest;
//! use hostlink_observe::{BridgeEvent, CollectingSubscriber, EventDispatcher, LoggingSubscriber};
//! use std::sync::Arc;
//!
//! let dispatcher = EventDispatcher::new();
//! let collected = Arc::new(CollectingSubscriber::new(16));
//! dispatcher.subscribe(Arc::new(LoggingSubscriber::new()));
//! dispatcher.subscribe(collected.clone());
//!
//! dispatcher.emit(BridgeEvent::Finalized {
//!     request: RawRequest::new(7),
//!     reason: "normal",
//! });
//! assert_eq!(collected.event_types(), ["finalized"]);
//! ```

pub mod events;
pub mod metrics;

// Re-export main types
pub use events::{
    BridgeEvent, CollectingSubscriber, EventDispatcher, EventSubscriber, LoggingSubscriber,
};
pub use metrics::{MetricsCollector, MetricsSnapshot, OperationMetrics, WaitMetrics};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::events::{BridgeEvent, EventDispatcher, EventSubscriber};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
