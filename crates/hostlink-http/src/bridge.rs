//! The bridge: one host implementation bound to configuration, metrics and
//! events.
//!
//! Every operation goes through [`HttpBridge::sync_call`] or
//! [`HttpBridge::async_call`], which refuse calls on requests that are known to
//! be unusable, time the crossing, translate the status and report the result.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use hostlink_capi::{HttpCapi, SharedCapi};
use hostlink_core::{
    BridgeConfig, BridgeError, BridgeResult, Completer, Completion, Operation, RawStatus,
    RequestHandle, StatusCode,
};
use hostlink_observe::{BridgeEvent, EventDispatcher, MetricsCollector};

use crate::request::HttpRequest;

/// Extension-side entry point for a host.
///
/// Cloning is cheap; clones share the host, configuration, metrics and event
/// dispatcher.
#[derive(Clone)]
pub struct HttpBridge {
    capi: SharedCapi,
    config: Arc<BridgeConfig>,
    metrics: Arc<MetricsCollector>,
    events: Arc<EventDispatcher>,
}

impl HttpBridge {
    /// Create a bridge with the default configuration.
    pub fn new(capi: SharedCapi) -> Self {
        Self {
            capi,
            config: Arc::new(BridgeConfig::default()),
            metrics: Arc::new(MetricsCollector::new()),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Share a metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share an event dispatcher.
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Bind a request handle received from the host.
    pub fn request(&self, handle: RequestHandle) -> HttpRequest {
        HttpRequest::new(self.clone(), handle)
    }

    /// The host implementation.
    pub fn capi(&self) -> &SharedCapi {
        &self.capi
    }

    /// The configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The event dispatcher.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Run a synchronous-only host call.
    pub(crate) fn sync_call<F>(
        &self,
        handle: &RequestHandle,
        operation: Operation,
        call: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(&dyn HttpCapi) -> RawStatus,
    {
        self.refuse_if_unusable(handle, operation)?;

        let started = Instant::now();
        let raw = call(self.capi.as_ref());
        let elapsed = started.elapsed();
        trace!(request = %handle.raw(), %operation, raw, "Host call returned");

        self.metrics.record_call(operation, elapsed);
        self.metrics.record_status(raw);

        let result = handle.settle(operation, raw);
        match &result {
            Ok(()) => self.completed(handle, operation, raw, elapsed),
            Err(err) => self.failed(handle, operation, err),
        }
        result
    }

    /// Run a host call that may complete asynchronously, waiting for it if so.
    ///
    /// `call` receives the [`Completer`] the host must use to finish a
    /// pending call.
    pub(crate) fn async_call<F>(
        &self,
        handle: &RequestHandle,
        operation: Operation,
        call: F,
    ) -> BridgeResult<Completion>
    where
        F: FnOnce(&dyn HttpCapi, Completer) -> RawStatus,
    {
        self.refuse_if_unusable(handle, operation)?;

        let capi = self.capi.as_ref();
        let started = Instant::now();
        let result = handle.call_async(operation, self.config.metadata_wait_timeout, |completer| {
            call(capi, completer)
        });
        let elapsed = started.elapsed();

        match &result {
            Ok(completion) => {
                self.metrics.record_call(operation, elapsed);
                self.metrics.record_status(completion.status);
                if let Some(waited) = completion.waited {
                    self.metrics.record_wait(waited);
                    self.events.emit(BridgeEvent::PendingCompleted {
                        request: handle.raw(),
                        operation,
                        waited,
                    });
                }
                self.completed(handle, operation, completion.status, elapsed);
            }
            Err(err @ BridgeError::GateBusy { .. }) => {
                // Nothing crossed the boundary.
                self.metrics.record_refused(operation);
                self.failed(handle, operation, err);
            }
            Err(err) => {
                self.metrics.record_call(operation, elapsed);
                if let Some(raw) = raw_status_of(err) {
                    self.metrics.record_status(raw);
                }
                if let BridgeError::WaitTimedOut { timeout, .. } = err {
                    self.timed_out(handle, operation, *timeout);
                }
                self.failed(handle, operation, err);
            }
        }
        result
    }

    /// Report an operation that failed after a successful crossing.
    pub(crate) fn failed(&self, handle: &RequestHandle, operation: Operation, err: &BridgeError) {
        debug!(request = %handle.raw(), %operation, error = %err, fatal = err.is_fatal(), "Operation failed");
        self.metrics.record_failure(operation);
        self.events.emit(BridgeEvent::CallFailed {
            request: handle.raw(),
            operation,
            message: err.to_string(),
            fatal: err.is_fatal(),
        });
    }

    fn completed(&self, handle: &RequestHandle, operation: Operation, status: RawStatus, duration: Duration) {
        self.events.emit(BridgeEvent::CallCompleted {
            request: handle.raw(),
            operation,
            status,
            duration,
        });
    }

    fn timed_out(&self, handle: &RequestHandle, operation: Operation, timeout: Duration) {
        self.metrics.record_timeout();
        self.events.emit(BridgeEvent::WaitTimedOut {
            request: handle.raw(),
            operation,
            timeout,
        });
    }

    fn refuse_if_unusable(&self, handle: &RequestHandle, operation: Operation) -> BridgeResult<()> {
        let Err(err) = handle.check_live(operation) else {
            return Ok(());
        };

        debug!(request = %handle.raw(), %operation, error = %err, "Refusing call on unusable request");
        self.metrics.record_refused(operation);
        let status = err.status().unwrap_or(StatusCode::RequestDestroyed);
        self.events.emit(BridgeEvent::CallRefused {
            request: handle.raw(),
            operation,
            status,
        });
        Err(err)
    }
}

impl fmt::Debug for HttpBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBridge")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// The raw host status an error was caused by, if any.
fn raw_status_of(err: &BridgeError) -> Option<RawStatus> {
    match err {
        BridgeError::Fatal { status, .. } => Some(status.as_raw()),
        BridgeError::UnknownStatus { raw, .. } => Some(*raw),
        BridgeError::UnexpectedPending { .. } => Some(StatusCode::Pending.as_raw()),
        _ => None,
    }
}
