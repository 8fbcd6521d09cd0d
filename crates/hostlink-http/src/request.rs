//! Operations on one in-flight request.
//!
//! Header, buffer and metadata operations live next to their codecs in
//! [`headers`](crate::headers), [`buffer`](crate::buffer) and
//! [`metadata`](crate::metadata).

use std::ops::Deref;
use std::time::Instant;

use tracing::{debug, warn};

use hostlink_capi::{FilterStatus, FinalizeReason, HostString, StringValueId};
use hostlink_core::{BridgeError, BridgeResult, DecodeError, Operation, RequestHandle};
use hostlink_observe::BridgeEvent;

use crate::bridge::HttpBridge;
use crate::reply::LocalReply;

/// A request handle bound to a bridge.
///
/// Cheap to clone. All clones refer to the same host request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    bridge: HttpBridge,
    handle: RequestHandle,
}

impl HttpRequest {
    pub(crate) fn new(bridge: HttpBridge, handle: RequestHandle) -> Self {
        Self { bridge, handle }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    /// The bridge this request is bound to.
    pub fn bridge(&self) -> &HttpBridge {
        &self.bridge
    }

    /// Resume the request with `status`.
    pub fn continue_request(&self, status: FilterStatus) -> BridgeResult<()> {
        self.bridge
            .sync_call(&self.handle, Operation::Continue, |capi| {
                capi.continue_request(&self.handle, status)
            })
    }

    /// Terminate the request with a synthesized response.
    pub fn send_local_reply(&self, reply: &LocalReply) -> BridgeResult<()> {
        let headers = reply.flattened_headers();
        self.bridge
            .sync_call(&self.handle, Operation::SendLocalReply, |capi| {
                capi.send_local_reply(
                    &self.handle,
                    reply.response_code,
                    &reply.body,
                    &headers,
                    reply.grpc_status,
                    &reply.details,
                )
            })?;
        self.bridge
            .metrics()
            .record_bytes_out(Operation::SendLocalReply, reply.wire_len());
        Ok(())
    }

    /// Name of the matched route.
    pub fn get_route_name(&self) -> BridgeResult<String> {
        let mut value = HostString::new();
        self.bridge
            .sync_call(&self.handle, Operation::GetRouteName, |capi| {
                capi.get_string_value(&self.handle, StringValueId::RouteName, &mut value)
            })?;
        let name = self.host_string(Operation::GetRouteName, value)?;
        Ok(name.unwrap_or_default())
    }

    /// Tell the host the extension is done with the request.
    ///
    /// Only the first call reaches the host. Nothing crosses if the host has
    /// already reported the request gone or destroyed.
    pub fn finalize(&self, reason: FinalizeReason) {
        if !self.handle.mark_finalized() {
            debug!(request = %self.handle.raw(), "Request already finalized");
            return;
        }
        if let Some(status) = self.handle.terminal_status() {
            debug!(request = %self.handle.raw(), %status, "Skipping finalize for ended request");
            return;
        }

        let started = Instant::now();
        self.bridge.capi().finalize(&self.handle, reason);
        self.bridge
            .metrics()
            .record_call(Operation::Finalize, started.elapsed());
        self.bridge.events().emit(BridgeEvent::Finalized {
            request: self.handle.raw(),
            reason: match reason {
                FinalizeReason::Normal => "normal",
                FinalizeReason::Dropped => "dropped",
            },
        });
    }

    /// Wrap the request so it is finalized when dropped.
    pub fn into_guard(self) -> FinalizeGuard {
        FinalizeGuard { request: self }
    }

    /// Copy a string the host lent for the duration of a call.
    pub(crate) fn host_string(
        &self,
        operation: Operation,
        value: HostString,
    ) -> BridgeResult<Option<String>> {
        let Some(bytes) = value.into_bytes() else {
            return Ok(None);
        };
        self.bridge.metrics().record_bytes_in(operation, bytes.len());

        if !self.bridge.config().strict_utf8 {
            return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                let err = BridgeError::Decode {
                    operation,
                    source: DecodeError::HostString(err.utf8_error()),
                };
                self.bridge.failed(&self.handle, operation, &err);
                Err(err)
            }
        }
    }
}

/// Finalizes the request with [`FinalizeReason::Dropped`] unless it was
/// finalized explicitly.
#[derive(Debug)]
pub struct FinalizeGuard {
    request: HttpRequest,
}

impl FinalizeGuard {
    /// Finalize with [`FinalizeReason::Normal`].
    pub fn finalize(self) {
        self.request.finalize(FinalizeReason::Normal);
    }
}

impl Deref for FinalizeGuard {
    type Target = HttpRequest;

    fn deref(&self) -> &HttpRequest {
        &self.request
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if !self.request.handle.is_finalized() {
            warn!(request = %self.request.handle.raw(), "Request dropped without finalize");
            self.request.finalize(FinalizeReason::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hostlink_capi::{MemoryHost, MockHttpCapi, RequestSnapshot};
    use hostlink_core::{BridgeConfig, StatusCode};
    use hostlink_observe::{CollectingSubscriber, EventSubscriber};

    fn memory_request(snapshot: RequestSnapshot) -> (Arc<MemoryHost>, HttpRequest) {
        let host = Arc::new(MemoryHost::new());
        let handle = host.register(snapshot);
        let bridge = HttpBridge::new(host.clone());
        (host, bridge.request(handle))
    }

    #[test]
    fn test_route_name() {
        let (_, request) = memory_request(RequestSnapshot::new().with_route_name("checkout"));
        assert_eq!(request.get_route_name().unwrap(), "checkout");
    }

    #[test]
    fn test_route_name_invalid_utf8() {
        let mut mock = MockHttpCapi::new();
        mock.expect_get_string_value().returning(|_, _, value| {
            value.fill(&[0x66, 0xff]);
            0
        });
        let bridge = HttpBridge::new(Arc::new(mock));
        let request = bridge.request(RequestHandle::new(hostlink_core::RawRequest::new(1)));

        let err = request.get_route_name().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Decode {
                source: DecodeError::HostString(_),
                ..
            }
        ));
        assert!(!err.is_fatal());

        let relaxed = bridge
            .with_config(BridgeConfig::relaxed())
            .request(request.handle().clone());
        assert_eq!(relaxed.get_route_name().unwrap(), "f\u{fffd}");
    }

    #[test]
    fn test_continue_and_local_reply_recorded() {
        let (host, request) = memory_request(RequestSnapshot::new());

        request.continue_request(FilterStatus::StopAndBuffer).unwrap();
        request
            .send_local_reply(
                &LocalReply::new(429)
                    .with_body("slow down")
                    .with_header("retry-after", "3")
                    .with_details("rate_limited"),
            )
            .unwrap();

        assert_eq!(
            host.continued(request.handle()).unwrap(),
            vec![FilterStatus::StopAndBuffer]
        );
        let reply = &host.replies(request.handle()).unwrap()[0];
        assert_eq!(reply.response_code, 429);
        assert_eq!(reply.body, "slow down");
        assert_eq!(reply.headers, vec![("retry-after".to_string(), "3".to_string())]);
        assert_eq!(reply.grpc_status, -1);
        assert_eq!(reply.details, "rate_limited");
    }

    #[test]
    fn test_destroyed_stops_further_calls() {
        let mut mock = MockHttpCapi::new();
        mock.expect_set_header()
            .times(1)
            .return_const(StatusCode::RequestDestroyed.as_raw());
        mock.expect_remove_header().times(0);
        mock.expect_continue_request().times(0);
        mock.expect_finalize().times(0);

        let bridge = HttpBridge::new(Arc::new(mock));
        let request = bridge.request(RequestHandle::new(hostlink_core::RawRequest::new(7)));

        let err = request.set_header("x-a", "1").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.status(), Some(StatusCode::RequestDestroyed));

        let err = request.remove_header("x-a").unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::RequestDestroyed));
        let err = request.continue_request(FilterStatus::Continue).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::RequestDestroyed));
        request.finalize(FinalizeReason::Normal);

        let snapshot = bridge.metrics().snapshot();
        assert_eq!(snapshot.operation(Operation::SetHeader).calls, 1);
        assert_eq!(snapshot.operation(Operation::RemoveHeader).refused, 1);
        assert_eq!(snapshot.operation(Operation::Continue).refused, 1);
    }

    #[test]
    fn test_gone_reported_by_host() {
        let (host, request) = memory_request(RequestSnapshot::new());
        host.mark_gone(request.handle()).unwrap();

        let err = request.continue_request(FilterStatus::Continue).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::RequestGone));

        // The second call is refused locally.
        let _ = request.get_route_name();
        assert_eq!(host.calls(request.handle()).unwrap(), vec![Operation::Continue]);
    }

    #[test]
    fn test_finalize_once() {
        let (host, request) = memory_request(RequestSnapshot::new());
        request.finalize(FinalizeReason::Normal);
        request.finalize(FinalizeReason::Dropped);

        assert_eq!(
            host.finalized(request.handle()).unwrap(),
            Some(FinalizeReason::Normal)
        );
        assert_eq!(
            host.calls(request.handle()).unwrap(),
            vec![Operation::Finalize]
        );

        let err = request.get_route_name().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::RequestDestroyed));
    }

    #[test]
    fn test_guard_finalizes_on_drop() {
        let (host, request) = memory_request(RequestSnapshot::new());
        let handle = request.handle().clone();
        {
            let guard = request.into_guard();
            guard.continue_request(FilterStatus::Continue).unwrap();
        }
        assert_eq!(host.finalized(&handle).unwrap(), Some(FinalizeReason::Dropped));
    }

    #[test]
    fn test_guard_explicit_finalize() {
        let (host, request) = memory_request(RequestSnapshot::new());
        let handle = request.handle().clone();
        request.into_guard().finalize();
        assert_eq!(host.finalized(&handle).unwrap(), Some(FinalizeReason::Normal));
        assert_eq!(host.calls(&handle).unwrap().len(), 1);
    }

    #[test]
    fn test_events_emitted() {
        let (host, request) = memory_request(RequestSnapshot::new());
        let collector = Arc::new(CollectingSubscriber::new(16));
        request
            .bridge()
            .events()
            .subscribe(Arc::clone(&collector) as Arc<dyn EventSubscriber>);

        request.continue_request(FilterStatus::Continue).unwrap();
        host.destroy(request.handle()).unwrap();
        let _ = request.continue_request(FilterStatus::Continue);
        let _ = request.continue_request(FilterStatus::Continue);
        request.finalize(FinalizeReason::Normal);

        assert_eq!(
            collector.event_types(),
            vec!["call_completed", "call_failed", "call_refused"]
        );
    }
}
