//! Observable events for boundary calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::Level;

use hostlink_core::{Operation, RawRequest, RawStatus, StatusCode};

/// Events emitted by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A call crossed the boundary and returned.
    CallCompleted {
        /// The request.
        request: RawRequest,
        /// The operation.
        operation: Operation,
        /// The final raw status.
        status: RawStatus,
        /// Time spent in the host, including any pending wait.
        duration: Duration,
    },
    /// A call was refused before crossing because the request is unusable.
    CallRefused {
        /// The request.
        request: RawRequest,
        /// The operation.
        operation: Operation,
        /// Why it is unusable.
        status: StatusCode,
    },
    /// An operation failed.
    CallFailed {
        /// The request.
        request: RawRequest,
        /// The operation.
        operation: Operation,
        /// Error message.
        message: String,
        /// Whether the failure aborts the call chain.
        fatal: bool,
    },
    /// A pending call received its completion.
    PendingCompleted {
        /// The request.
        request: RawRequest,
        /// The operation.
        operation: Operation,
        /// Time parked.
        waited: Duration,
    },
    /// A pending call gave up waiting.
    WaitTimedOut {
        /// The request.
        request: RawRequest,
        /// The operation.
        operation: Operation,
        /// The configured limit.
        timeout: Duration,
    },
    /// The request was finalized.
    Finalized {
        /// The request.
        request: RawRequest,
        /// Finalize reason name.
        reason: &'static str,
    },
}

impl BridgeEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            BridgeEvent::CallCompleted { .. } => "call_completed",
            BridgeEvent::CallRefused { .. } => "call_refused",
            BridgeEvent::CallFailed { .. } => "call_failed",
            BridgeEvent::PendingCompleted { .. } => "pending_completed",
            BridgeEvent::WaitTimedOut { .. } => "wait_timed_out",
            BridgeEvent::Finalized { .. } => "finalized",
        }
    }

    /// The operation the event belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            BridgeEvent::CallCompleted { operation, .. }
            | BridgeEvent::CallRefused { operation, .. }
            | BridgeEvent::CallFailed { operation, .. }
            | BridgeEvent::PendingCompleted { operation, .. }
            | BridgeEvent::WaitTimedOut { operation, .. } => *operation,
            BridgeEvent::Finalized { .. } => Operation::Finalize,
        }
    }
}

/// Subscriber for bridge events.
pub trait EventSubscriber: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &BridgeEvent);

    /// Filter for event types this subscriber is interested in.
    /// Returns `None` to receive all events.
    fn event_filter(&self) -> Option<Vec<&'static str>> {
        None
    }
}

/// A subscriber that logs events through `tracing`.
pub struct LoggingSubscriber {
    /// Level used for completed calls. Failures always log at `WARN`.
    pub log_level: Level,
}

impl LoggingSubscriber {
    /// Create a new logging subscriber.
    pub fn new() -> Self {
        Self {
            log_level: Level::DEBUG,
        }
    }

    /// Set the level used for completed calls.
    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    fn log_completed(&self, request: RawRequest, operation: Operation, status: RawStatus, duration: Duration) {
        let duration_us = duration.as_micros() as u64;
        macro_rules! completed {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    event = "call_completed",
                    request = %request,
                    %operation,
                    status,
                    duration_us,
                    "Host call completed"
                )
            };
        }
        match self.log_level {
            Level::TRACE => completed!(Level::TRACE),
            Level::DEBUG => completed!(Level::DEBUG),
            Level::INFO => completed!(Level::INFO),
            Level::WARN => completed!(Level::WARN),
            _ => completed!(Level::ERROR),
        }
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::CallCompleted {
                request,
                operation,
                status,
                duration,
            } => self.log_completed(*request, *operation, *status, *duration),
            BridgeEvent::CallRefused {
                request,
                operation,
                status,
            } => {
                tracing::debug!(
                    event = "call_refused",
                    request = %request,
                    %operation,
                    %status,
                    "Call refused locally"
                );
            }
            BridgeEvent::CallFailed {
                request,
                operation,
                message,
                fatal,
            } => {
                tracing::warn!(
                    event = "call_failed",
                    request = %request,
                    %operation,
                    fatal,
                    message = message.as_str(),
                    "Host call failed"
                );
            }
            BridgeEvent::PendingCompleted {
                request,
                operation,
                waited,
            } => {
                tracing::debug!(
                    event = "pending_completed",
                    request = %request,
                    %operation,
                    waited_us = waited.as_micros() as u64,
                    "Pending call completed"
                );
            }
            BridgeEvent::WaitTimedOut {
                request,
                operation,
                timeout,
            } => {
                tracing::warn!(
                    event = "wait_timed_out",
                    request = %request,
                    %operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "Gave up waiting for host"
                );
            }
            BridgeEvent::Finalized { request, reason } => {
                tracing::debug!(event = "finalized", request = %request, reason, "Request finalized");
            }
        }
    }
}

/// A subscriber that collects events for later analysis.
pub struct CollectingSubscriber {
    events: RwLock<Vec<(Instant, BridgeEvent)>>,
    max_events: usize,
}

impl CollectingSubscriber {
    /// Create a new collecting subscriber.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<(Instant, BridgeEvent)> {
        self.events.read().clone()
    }

    /// Event type names in arrival order.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .read()
            .iter()
            .map(|(_, event)| event.event_type())
            .collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, event: &BridgeEvent) {
        let mut events = self.events.write();
        if events.len() < self.max_events {
            events.push((Instant::now(), event.clone()));
        }
    }
}

/// Event dispatcher that manages subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: BridgeEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            if let Some(filter) = subscriber.event_filter() {
                if !filter.contains(&event.event_type()) {
                    continue;
                }
            }
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed() -> BridgeEvent {
        BridgeEvent::CallCompleted {
            request: RawRequest::new(0x1000),
            operation: Operation::SetHeader,
            status: 0,
            duration: Duration::from_micros(3),
        }
    }

    struct FailuresOnly(CollectingSubscriber);

    impl EventSubscriber for FailuresOnly {
        fn on_event(&self, event: &BridgeEvent) {
            self.0.on_event(event);
        }

        fn event_filter(&self) -> Option<Vec<&'static str>> {
            Some(vec!["call_failed"])
        }
    }

    #[test]
    fn test_bridge_event_type() {
        assert_eq!(completed().event_type(), "call_completed");
        assert_eq!(completed().operation(), Operation::SetHeader);
        let finalized = BridgeEvent::Finalized {
            request: RawRequest::new(1),
            reason: "normal",
        };
        assert_eq!(finalized.operation(), Operation::Finalize);
    }

    #[test]
    fn test_collecting_subscriber_max_events() {
        let subscriber = CollectingSubscriber::new(2);

        for id in 0..5 {
            subscriber.on_event(&BridgeEvent::Finalized {
                request: RawRequest::new(id),
                reason: "normal",
            });
        }

        assert_eq!(subscriber.len(), 2);
        let kept: Vec<_> = subscriber
            .events()
            .into_iter()
            .map(|(_, event)| match event {
                BridgeEvent::Finalized { request, .. } => request,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(kept, [RawRequest::new(0), RawRequest::new(1)]);
        subscriber.clear();
        assert!(subscriber.is_empty());
    }

    #[test]
    fn test_event_dispatcher_filters() {
        let dispatcher = EventDispatcher::new();
        let everything = Arc::new(CollectingSubscriber::new(100));
        let failures = Arc::new(FailuresOnly(CollectingSubscriber::new(100)));

        dispatcher.subscribe(Arc::clone(&everything) as Arc<dyn EventSubscriber>);
        dispatcher.subscribe(Arc::clone(&failures) as Arc<dyn EventSubscriber>);
        dispatcher.subscribe(Arc::new(LoggingSubscriber::new().with_level(Level::TRACE)));
        assert_eq!(dispatcher.subscriber_count(), 3);

        dispatcher.emit(completed());
        dispatcher.emit(BridgeEvent::CallFailed {
            request: RawRequest::new(0x1000),
            operation: Operation::GetBuffer,
            message: "buffer gone".to_string(),
            fatal: true,
        });

        assert_eq!(everything.event_types(), vec!["call_completed", "call_failed"]);
        assert_eq!(failures.0.event_types(), vec!["call_failed"]);

        dispatcher.clear_subscribers();
        dispatcher.emit(completed());
        assert_eq!(everything.len(), 2);
    }
}
