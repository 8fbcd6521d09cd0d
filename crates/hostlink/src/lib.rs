//! # Hostlink - HTTP Filter Host Bridge
//!
//! Hostlink lets HTTP filter extensions call into the proxy host that owns the
//! request: read and rewrite headers, trailers and bodies, reply locally, and
//! exchange structured dynamic metadata, without ever touching host memory
//! after a call returns.
//!
//! ## Features
//!
//! - **Typed outcomes**: every raw host status maps to exactly one outcome;
//!   fatal statuses become errors, never panics
//! - **Owned data**: strings and bytes are copied out before the call returns
//! - **Async completion**: metadata reads the host completes later are waited
//!   on through a one-shot gate, with an optional timeout
//! - **Injectable host**: the operation set is a trait; tests and tools use the
//!   in-process [`MemoryHost`](hostlink_capi::MemoryHost)
//!
//! ## Quick Start
//!
//! ```
//! use hostlink::prelude::*;
//! use serde_json::json;
//!
//! let host = Arc::new(MemoryHost::new());
//! let bridge = HostLink::builder()
//!     .with_capi(host.clone())
//!     .with_metadata_wait_timeout(Duration::from_secs(1))
//!     .build()?;
//!
//! let request = bridge.request(host.register(RequestSnapshot::new().with_route_name("api")));
//! assert_eq!(request.get_route_name()?, "api");
//!
//! request.set_dynamic_metadata("filter.auth", "user", &json!("alice"))?;
//! let auth = request.get_dynamic_metadata("filter.auth")?;
//! assert_eq!(auth["user"], "alice");
//!
//! request.into_guard().finalize();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Extension Logic                      │
//! ├─────────────────────────────────────────────────────────┤
//! │                    hostlink (facade)                    │
//! │                  ┌───────────────────┐                  │
//! │                  │  HostLink Builder │                  │
//! │                  └─────────┬─────────┘                  │
//! │                            │                            │
//! │  ┌──────────────┬──────────┴───────┬────────────────┐   │
//! │  │ hostlink-    │ hostlink-http    │ hostlink-      │   │
//! │  │ core         │ (requests,       │ observe        │   │
//! │  │ (status,     │  headers, body,  │ (metrics,      │   │
//! │  │  gate)       │  metadata)       │  events)       │   │
//! │  └──────────────┴──────────────────┴────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │              hostlink-capi (HttpCapi trait)             │
//! ├─────────────────────────────────────────────────────────┤
//! │                     Proxy Host                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use hostlink_capi::SharedCapi;
use hostlink_core::{BridgeConfig, ConfigError};
use hostlink_http::HttpBridge;
use hostlink_observe::{EventDispatcher, EventSubscriber, LoggingSubscriber, MetricsCollector};

// Re-export from sub-crates
pub use hostlink_capi;
pub use hostlink_core;
pub use hostlink_http;
pub use hostlink_observe;

/// Main entry point for Hostlink.
pub struct HostLink;

impl HostLink {
    /// Create a new bridge builder.
    pub fn builder() -> HostLinkBuilder {
        HostLinkBuilder::new()
    }

    /// Create a bridge for `capi` with the default configuration.
    pub fn with_host(capi: SharedCapi) -> Result<HttpBridge, HostLinkError> {
        HostLinkBuilder::new().with_capi(capi).build()
    }
}

/// Builder for configuring a bridge.
pub struct HostLinkBuilder {
    config: BridgeConfig,
    capi: Option<SharedCapi>,
    metrics: Option<Arc<MetricsCollector>>,
    event_subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl HostLinkBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            capi: None,
            metrics: None,
            event_subscribers: Vec::new(),
        }
    }

    // Host

    /// Set the host implementation.
    pub fn with_capi(mut self, capi: SharedCapi) -> Self {
        self.capi = Some(capi);
        self
    }

    // Configuration

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Result<Self, HostLinkError> {
        self.config = BridgeConfig::from_file(path)?;
        Ok(self)
    }

    /// Bound the wait for asynchronously completed metadata reads.
    pub fn with_metadata_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_metadata_wait_timeout(timeout);
        self
    }

    /// Set the largest header or trailer copy accepted.
    pub fn with_max_header_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_max_header_bytes(bytes);
        self
    }

    /// Set the largest body buffer copy accepted.
    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_max_buffer_bytes(bytes);
        self
    }

    /// Reject (`true`) or replace (`false`) invalid UTF-8 from the host.
    pub fn with_strict_utf8(mut self, strict: bool) -> Self {
        self.config = self.config.with_strict_utf8(strict);
        self
    }

    // Observability

    /// Share a metrics collector with other bridges.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add an event subscriber.
    pub fn with_event_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.event_subscribers.push(subscriber);
        self
    }

    /// Log every bridge event through `tracing`.
    pub fn with_event_logging(self) -> Self {
        self.with_event_subscriber(Arc::new(LoggingSubscriber::new()))
    }

    /// Build the bridge.
    pub fn build(self) -> Result<HttpBridge, HostLinkError> {
        let capi = self.capi.ok_or(HostLinkError::MissingHost)?;
        self.config.validate()?;

        let events = EventDispatcher::new();
        for subscriber in self.event_subscribers {
            events.subscribe(subscriber);
        }
        let metrics = self.metrics.unwrap_or_default();

        debug!(
            subscribers = events.subscriber_count(),
            strict_utf8 = self.config.strict_utf8,
            "Bridge built"
        );

        Ok(HttpBridge::new(capi)
            .with_config(self.config)
            .with_metrics(metrics)
            .with_events(Arc::new(events)))
    }
}

impl Default for HostLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostLinkBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLinkBuilder")
            .field("config", &self.config)
            .field("has_capi", &self.capi.is_some())
            .field("event_subscribers", &self.event_subscribers.len())
            .finish()
    }
}

/// Errors from building a bridge.
#[derive(Debug, thiserror::Error)]
pub enum HostLinkError {
    /// No host implementation was given.
    #[error("No host implementation configured")]
    MissingHost,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{HostLink, HostLinkBuilder, HostLinkError};

    // Core types
    pub use hostlink_core::{
        BridgeConfig, BridgeError, BridgeResult, Operation, RawRequest, RequestHandle, StatusCode,
    };

    // Host types
    pub use hostlink_capi::{
        BufferAction, BufferId, FilterStatus, FinalizeReason, HttpCapi, MemoryHost,
        MetadataDelivery, RequestSnapshot, SharedCapi,
    };

    // Request API
    pub use hostlink_http::{FinalizeGuard, HeaderCollection, HttpBridge, HttpRequest, LocalReply};

    // Observability types
    pub use hostlink_observe::{
        BridgeEvent, CollectingSubscriber, EventDispatcher, EventSubscriber, MetricsCollector,
        MetricsSnapshot,
    };

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use serde_json::json;

    #[test]
    fn test_builder_requires_host() {
        let err = HostLink::builder().build().unwrap_err();
        assert!(matches!(err, HostLinkError::MissingHost));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let err = HostLink::builder()
            .with_capi(Arc::new(MemoryHost::new()))
            .with_max_buffer_bytes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, HostLinkError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_builder_applies_config() {
        let bridge = HostLink::builder()
            .with_capi(Arc::new(MemoryHost::new()))
            .with_config(BridgeConfig::strict())
            .with_max_header_bytes(1024)
            .with_strict_utf8(false)
            .build()
            .unwrap();

        assert_eq!(bridge.config().max_header_bytes, 1024);
        assert_eq!(bridge.config().max_buffer_bytes, BridgeConfig::strict().max_buffer_bytes);
        assert!(!bridge.config().strict_utf8);
    }

    #[test]
    fn test_shared_metrics_and_subscribers() {
        let host = Arc::new(MemoryHost::new());
        let metrics = Arc::new(MetricsCollector::new());
        let collector = Arc::new(CollectingSubscriber::new(8));

        let bridge = HostLink::builder()
            .with_capi(host.clone())
            .with_metrics(Arc::clone(&metrics))
            .with_event_subscriber(collector.clone())
            .with_event_logging()
            .build()
            .unwrap();
        assert_eq!(bridge.events().subscriber_count(), 2);

        let request = bridge.request(host.register(RequestSnapshot::new()));
        request.continue_request(FilterStatus::Continue).unwrap();

        assert_eq!(metrics.snapshot().operation(Operation::Continue).calls, 1);
        assert_eq!(collector.event_types(), vec!["call_completed"]);
    }

    #[test]
    fn test_deferred_metadata_end_to_end() {
        let host = Arc::new(
            MemoryHost::new().with_delivery(MetadataDelivery::Deferred(Duration::from_millis(10))),
        );
        let bridge = HostLink::builder()
            .with_capi(host.clone())
            .with_metadata_wait_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let request = bridge.request(host.register(RequestSnapshot::new()));

        request
            .set_dynamic_metadata("envoy.lb", "weights", &json!([1, 2.5, null]))
            .unwrap();
        let metadata = request.get_dynamic_metadata("envoy.lb").unwrap();
        assert_eq!(metadata["weights"], json!([1, 2.5, null]));

        let waits = bridge.metrics().snapshot().waits;
        assert_eq!(waits.pending_waits, 1);
    }

    #[test]
    fn test_prelude_imports() {
        let _bridge = HostLink::with_host(Arc::new(MemoryHost::new())).unwrap();
    }
}
