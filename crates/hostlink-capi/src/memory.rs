//! In-process host.
//!
//! `MemoryHost` keeps request state in memory and answers every boundary call
//! the way a proxy host would, including the failure statuses and the
//! asynchronous completion of metadata reads. It records every call that
//! reaches it so tests can assert on what crossed the boundary.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use parking_lot::RwLock;
use prost::Message;
use prost_types::{Struct, Value};
use serde::Serialize;
use tracing::{debug, trace, warn};

use hostlink_core::{Completer, GatePhase, Operation, RawRequest, RawStatus, RequestHandle, StatusCode};

use crate::api::{HttpCapi, unflatten_pairs};
use crate::error::{HostError, HostResult};
use crate::types::{
    AsyncBuffer, BufferAction, BufferId, FilterStatus, FinalizeReason, HeaderAction, HostString,
    SliceDescriptor, StringValueId,
};

const OK: RawStatus = StatusCode::Ok as RawStatus;

/// Initial state of a request registered with a [`MemoryHost`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSnapshot {
    /// Headers in arrival order. Keys may repeat.
    pub headers: Vec<(String, String)>,
    /// Trailers in arrival order. Keys may repeat.
    pub trailers: Vec<(String, String)>,
    /// Body buffers by id.
    pub buffers: BTreeMap<BufferId, Vec<u8>>,
    /// Name of the matched route.
    pub route_name: String,
    /// Dynamic metadata by filter namespace.
    pub metadata: BTreeMap<String, Struct>,
}

impl RequestSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header value.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add a trailer value.
    pub fn with_trailer(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.trailers.push((key.into(), value.into()));
        self
    }

    /// Add a body buffer.
    pub fn with_buffer(mut self, id: BufferId, content: impl Into<Vec<u8>>) -> Self {
        self.buffers.insert(id, content.into());
        self
    }

    /// Set the route name.
    pub fn with_route_name(mut self, name: impl Into<String>) -> Self {
        self.route_name = name.into();
        self
    }

    /// Set the metadata of a namespace.
    pub fn with_metadata(mut self, namespace: impl Into<String>, fields: Struct) -> Self {
        self.metadata.insert(namespace.into(), fields);
        self
    }
}

/// How a [`MemoryHost`] answers dynamic metadata reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataDelivery {
    /// Write the result and return `Ok`.
    #[default]
    Immediate,
    /// Return `Pending` and complete from a worker thread after the delay.
    Deferred(Duration),
    /// Complete before returning `Pending`, so the completion races ahead of
    /// the caller's wait.
    SignalBeforeReturn,
}

/// Host-side view of whether a request can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Calls are served.
    Live,
    /// The request finished or was reset.
    Gone,
    /// The request object was destroyed.
    Destroyed,
}

impl Liveness {
    fn failure(self) -> Option<StatusCode> {
        match self {
            Liveness::Live => None,
            Liveness::Gone => Some(StatusCode::RequestGone),
            Liveness::Destroyed => Some(StatusCode::RequestDestroyed),
        }
    }
}

/// A local reply as received by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedReply {
    /// Response status code.
    pub response_code: u32,
    /// Response body.
    pub body: String,
    /// Response headers, unflattened.
    pub headers: Vec<(String, String)>,
    /// gRPC status, `-1` when not applicable.
    pub grpc_status: i64,
    /// Details string.
    pub details: String,
}

struct HostRecord {
    handle: RequestHandle,
    liveness: Liveness,
    forced: HashMap<Operation, RawStatus>,
    headers: Vec<(String, String)>,
    trailers: Vec<(String, String)>,
    buffers: HashMap<BufferId, BytesMut>,
    route_name: String,
    metadata: BTreeMap<String, Struct>,
    calls: Vec<Operation>,
    continued: Vec<FilterStatus>,
    replies: Vec<RecordedReply>,
    finalized: Option<FinalizeReason>,
    pending: Option<Completer>,
}

impl HostRecord {
    fn new(handle: RequestHandle, snapshot: RequestSnapshot) -> Self {
        Self {
            handle,
            liveness: Liveness::Live,
            forced: HashMap::new(),
            headers: snapshot.headers,
            trailers: snapshot.trailers,
            buffers: snapshot
                .buffers
                .into_iter()
                .map(|(id, content)| (id, BytesMut::from(&content[..])))
                .collect(),
            route_name: snapshot.route_name,
            metadata: snapshot.metadata,
            calls: Vec::new(),
            continued: Vec::new(),
            replies: Vec::new(),
            finalized: None,
            pending: None,
        }
    }
}

/// In-process implementation of [`HttpCapi`].
///
/// # Example
///
/// ```
/// use hostlink_capi::{HttpCapi, MemoryHost, RequestSnapshot};
/// use hostlink_capi::types::HostString;
///
/// let host = MemoryHost::new();
/// let request = host.register(RequestSnapshot::new().with_header("host", "example.com"));
///
/// let mut value = HostString::new();
/// assert_eq!(host.get_header(&request, "host", &mut value), 0);
/// assert_eq!(value.into_bytes().as_deref(), Some(&b"example.com"[..]));
/// ```
pub struct MemoryHost {
    requests: DashMap<RawRequest, HostRecord>,
    next_token: AtomicUsize,
    delivery: RwLock<MetadataDelivery>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Create a host with no requests and immediate metadata delivery.
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            next_token: AtomicUsize::new(0x1000),
            delivery: RwLock::new(MetadataDelivery::Immediate),
        }
    }

    /// Set how metadata reads complete.
    pub fn with_delivery(self, delivery: MetadataDelivery) -> Self {
        self.set_delivery(delivery);
        self
    }

    /// Change how metadata reads complete.
    pub fn set_delivery(&self, delivery: MetadataDelivery) {
        *self.delivery.write() = delivery;
    }

    /// How metadata reads complete.
    pub fn delivery(&self) -> MetadataDelivery {
        *self.delivery.read()
    }

    /// Create a request and return its handle.
    pub fn register(&self, snapshot: RequestSnapshot) -> RequestHandle {
        let raw = RawRequest::new(self.next_token.fetch_add(0x10, Ordering::Relaxed));
        let handle = RequestHandle::new(raw);
        self.requests
            .insert(raw, HostRecord::new(handle.clone(), snapshot));
        debug!(request = %raw, "Request registered");
        handle
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no requests are registered.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Header count and total key/value bytes, as passed to header callbacks.
    pub fn headers_size(&self, request: &RequestHandle) -> HostResult<(usize, usize)> {
        self.inspect(request, |record| pairs_size(&record.headers))
    }

    /// Trailer count and total key/value bytes, as passed to trailer callbacks.
    pub fn trailers_size(&self, request: &RequestHandle) -> HostResult<(usize, usize)> {
        self.inspect(request, |record| pairs_size(&record.trailers))
    }

    /// Current headers.
    pub fn headers(&self, request: &RequestHandle) -> HostResult<Vec<(String, String)>> {
        self.inspect(request, |record| record.headers.clone())
    }

    /// Current trailers.
    pub fn trailers(&self, request: &RequestHandle) -> HostResult<Vec<(String, String)>> {
        self.inspect(request, |record| record.trailers.clone())
    }

    /// Ids of the request's body buffers, in ascending order.
    pub fn buffer_ids(&self, request: &RequestHandle) -> HostResult<Vec<BufferId>> {
        self.inspect(request, |record| {
            let mut ids: Vec<BufferId> = record.buffers.keys().copied().collect();
            ids.sort();
            ids
        })
    }

    /// Length of a body buffer, as passed to data callbacks.
    pub fn buffer_len(&self, request: &RequestHandle, buffer: BufferId) -> HostResult<usize> {
        self.buffer(request, buffer).map(|content| content.len())
    }

    /// Current content of a body buffer.
    pub fn buffer(&self, request: &RequestHandle, buffer: BufferId) -> HostResult<Bytes> {
        self.inspect(request, |record| {
            record
                .buffers
                .get(&buffer)
                .map(|content| Bytes::copy_from_slice(content))
        })?
        .ok_or(HostError::UnknownBuffer {
            request: request.raw(),
            buffer,
        })
    }

    /// Current metadata of a namespace.
    pub fn metadata(&self, request: &RequestHandle, namespace: &str) -> HostResult<Option<Struct>> {
        self.inspect(request, |record| record.metadata.get(namespace).cloned())
    }

    /// Every call that reached the host for this request, in order.
    pub fn calls(&self, request: &RequestHandle) -> HostResult<Vec<Operation>> {
        self.inspect(request, |record| record.calls.clone())
    }

    /// Statuses the request was continued with.
    pub fn continued(&self, request: &RequestHandle) -> HostResult<Vec<FilterStatus>> {
        self.inspect(request, |record| record.continued.clone())
    }

    /// Local replies sent for the request.
    pub fn replies(&self, request: &RequestHandle) -> HostResult<Vec<RecordedReply>> {
        self.inspect(request, |record| record.replies.clone())
    }

    /// The finalize reason, once finalized.
    pub fn finalized(&self, request: &RequestHandle) -> HostResult<Option<FinalizeReason>> {
        self.inspect(request, |record| record.finalized)
    }

    /// Host-side liveness.
    pub fn liveness(&self, request: &RequestHandle) -> HostResult<Liveness> {
        self.inspect(request, |record| record.liveness)
    }

    /// Finish the request: later calls answer `RequestGone`.
    pub fn mark_gone(&self, request: &RequestHandle) -> HostResult<()> {
        self.end(request, Liveness::Gone)
    }

    /// Destroy the request object: later calls answer `RequestDestroyed`.
    pub fn destroy(&self, request: &RequestHandle) -> HostResult<()> {
        self.end(request, Liveness::Destroyed)
    }

    /// Drop the request entirely. Later calls answer `RequestDestroyed`.
    pub fn remove(&self, request: &RequestHandle) -> HostResult<()> {
        self.requests
            .remove(&request.raw())
            .map(|_| debug!(request = %request.raw(), "Request removed"))
            .ok_or(HostError::UnknownRequest(request.raw()))
    }

    /// Answer every later call of `operation` with `raw` instead of serving it.
    pub fn force_status(
        &self,
        request: &RequestHandle,
        operation: Operation,
        raw: RawStatus,
    ) -> HostResult<()> {
        let mut record = self.record(request)?;
        record.forced.insert(operation, raw);
        Ok(())
    }

    /// Undo every [`force_status`](Self::force_status).
    pub fn clear_forced(&self, request: &RequestHandle) -> HostResult<()> {
        self.record(request)?.forced.clear();
        Ok(())
    }

    fn record(&self, request: &RequestHandle) -> HostResult<RefMut<'_, RawRequest, HostRecord>> {
        self.requests
            .get_mut(&request.raw())
            .ok_or(HostError::UnknownRequest(request.raw()))
    }

    fn inspect<T>(&self, request: &RequestHandle, read: impl FnOnce(&HostRecord) -> T) -> HostResult<T> {
        self.requests
            .get(&request.raw())
            .map(|record| read(&record))
            .ok_or(HostError::UnknownRequest(request.raw()))
    }

    fn end(&self, request: &RequestHandle, liveness: Liveness) -> HostResult<()> {
        let mut record = self.record(request)?;
        record.liveness = liveness;
        debug!(request = %request.raw(), ?liveness, "Request ended by host");

        // Whoever is parked on a pending call learns the outcome now.
        let pending = record.pending.take().filter(|completer| {
            let gate = record.handle.gate();
            gate.phase() == GatePhase::Armed && gate.generation() == completer.generation()
        });
        if let (Some(status), Some(completer)) = (liveness.failure(), pending) {
            completer.complete(status.as_raw());
        }
        Ok(())
    }

    /// Common entry for every call: record it, then refuse it or serve it.
    fn serve(
        &self,
        request: &RequestHandle,
        operation: Operation,
        body: impl FnOnce(&mut HostRecord) -> RawStatus,
    ) -> RawStatus {
        let Some(mut record) = self.requests.get_mut(&request.raw()) else {
            warn!(request = %request.raw(), %operation, "Call for an unknown request");
            return StatusCode::RequestDestroyed.as_raw();
        };

        record.calls.push(operation);

        if let Some(status) = record.liveness.failure() {
            trace!(request = %request.raw(), %operation, %status, "Refused");
            return status.as_raw();
        }
        if let Some(&raw) = record.forced.get(&operation) {
            trace!(request = %request.raw(), %operation, raw, "Forced status");
            return raw;
        }

        let raw = body(&mut record);
        trace!(request = %request.raw(), %operation, raw, "Served");
        raw
    }
}

impl HttpCapi for MemoryHost {
    fn continue_request(&self, request: &RequestHandle, status: FilterStatus) -> RawStatus {
        self.serve(request, Operation::Continue, |record| {
            record.continued.push(status);
            OK
        })
    }

    fn send_local_reply(
        &self,
        request: &RequestHandle,
        response_code: u32,
        body: &str,
        headers: &[String],
        grpc_status: i64,
        details: &str,
    ) -> RawStatus {
        self.serve(request, Operation::SendLocalReply, |record| {
            record.replies.push(RecordedReply {
                response_code,
                body: body.to_string(),
                headers: unflatten_pairs(headers),
                grpc_status,
                details: details.to_string(),
            });
            OK
        })
    }

    fn get_header(&self, request: &RequestHandle, key: &str, value: &mut HostString) -> RawStatus {
        self.serve(request, Operation::GetHeader, |record| {
            if let Some((_, found)) = record.headers.iter().find(|(name, _)| name == key) {
                value.fill(found.as_bytes());
            }
            OK
        })
    }

    fn copy_headers(
        &self,
        request: &RequestHandle,
        slots: &mut [SliceDescriptor],
        region: &mut [u8],
    ) -> RawStatus {
        self.serve(request, Operation::CopyHeaders, |record| {
            fill_pairs(&record.headers, slots, region)
        })
    }

    fn set_header(
        &self,
        request: &RequestHandle,
        key: &str,
        value: &str,
        action: HeaderAction,
    ) -> RawStatus {
        self.serve(request, Operation::SetHeader, |record| {
            match action {
                HeaderAction::Set => replace_pair(&mut record.headers, key, value),
                HeaderAction::Add => record.headers.push((key.to_string(), value.to_string())),
            }
            OK
        })
    }

    fn remove_header(&self, request: &RequestHandle, key: &str) -> RawStatus {
        self.serve(request, Operation::RemoveHeader, |record| {
            record.headers.retain(|(name, _)| name != key);
            OK
        })
    }

    fn get_buffer(&self, request: &RequestHandle, buffer: BufferId, dst: &mut [u8]) -> RawStatus {
        self.serve(request, Operation::GetBuffer, |record| {
            let Some(content) = record.buffers.get(&buffer) else {
                debug!(request = %request.raw(), %buffer, "No such buffer in this phase");
                return StatusCode::WrongPhase.as_raw();
            };
            let len = content.len().min(dst.len());
            dst[..len].copy_from_slice(&content[..len]);
            OK
        })
    }

    fn set_buffer(
        &self,
        request: &RequestHandle,
        buffer: BufferId,
        data: &[u8],
        action: BufferAction,
    ) -> RawStatus {
        self.serve(request, Operation::SetBuffer, |record| {
            let content = record.buffers.entry(buffer).or_default();
            match action {
                BufferAction::Set => {
                    content.clear();
                    content.extend_from_slice(data);
                }
                BufferAction::Append => content.extend_from_slice(data),
                BufferAction::Prepend => {
                    let mut joined = BytesMut::with_capacity(data.len() + content.len());
                    joined.extend_from_slice(data);
                    joined.extend_from_slice(content);
                    *content = joined;
                }
            }
            OK
        })
    }

    fn copy_trailers(
        &self,
        request: &RequestHandle,
        slots: &mut [SliceDescriptor],
        region: &mut [u8],
    ) -> RawStatus {
        self.serve(request, Operation::CopyTrailers, |record| {
            fill_pairs(&record.trailers, slots, region)
        })
    }

    fn set_trailer(&self, request: &RequestHandle, key: &str, value: &str) -> RawStatus {
        self.serve(request, Operation::SetTrailer, |record| {
            replace_pair(&mut record.trailers, key, value);
            OK
        })
    }

    fn get_string_value(
        &self,
        request: &RequestHandle,
        id: StringValueId,
        value: &mut HostString,
    ) -> RawStatus {
        self.serve(request, Operation::GetRouteName, |record| {
            match id {
                StringValueId::RouteName => value.fill(record.route_name.as_bytes()),
            }
            OK
        })
    }

    fn get_dynamic_metadata(
        &self,
        request: &RequestHandle,
        namespace: &str,
        out: AsyncBuffer,
        completer: Completer,
    ) -> RawStatus {
        let delivery = self.delivery();
        self.serve(request, Operation::GetDynamicMetadata, |record| {
            let encoded = record
                .metadata
                .get(namespace)
                .map(Message::encode_to_vec)
                .unwrap_or_default();

            match delivery {
                MetadataDelivery::Immediate => {
                    out.write(encoded);
                    OK
                }
                MetadataDelivery::SignalBeforeReturn => {
                    out.write(encoded);
                    completer.complete(OK);
                    StatusCode::Pending.as_raw()
                }
                MetadataDelivery::Deferred(delay) => {
                    let worker = completer.clone();
                    let worker_out = out.clone();
                    let payload = encoded.clone();
                    let spawned = thread::Builder::new()
                        .name("hostlink-host-worker".to_string())
                        .spawn(move || {
                            thread::sleep(delay);
                            worker_out.write(payload);
                            worker.complete(OK);
                        });

                    match spawned {
                        Ok(_) => {
                            record.pending = Some(completer);
                            StatusCode::Pending.as_raw()
                        }
                        Err(err) => {
                            warn!(request = %request.raw(), error = %err, "Worker unavailable, answering inline");
                            out.write(encoded);
                            OK
                        }
                    }
                }
            }
        })
    }

    fn set_dynamic_metadata(
        &self,
        request: &RequestHandle,
        namespace: &str,
        key: &str,
        encoded: &[u8],
    ) -> RawStatus {
        self.serve(request, Operation::SetDynamicMetadata, |record| {
            match Value::decode(encoded) {
                Ok(value) => {
                    record
                        .metadata
                        .entry(namespace.to_string())
                        .or_default()
                        .fields
                        .insert(key.to_string(), value);
                    OK
                }
                Err(err) => {
                    warn!(request = %request.raw(), namespace, key, error = %err, "Rejected metadata value");
                    StatusCode::InvalidContext.as_raw()
                }
            }
        })
    }

    fn finalize(&self, request: &RequestHandle, reason: FinalizeReason) {
        let _ = self.serve(request, Operation::Finalize, |record| {
            record.finalized = Some(reason);
            OK
        });
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("requests", &self.requests.len())
            .field("delivery", &self.delivery())
            .finish()
    }
}

fn pairs_size(pairs: &[(String, String)]) -> (usize, usize) {
    let bytes = pairs.iter().map(|(key, value)| key.len() + value.len()).sum();
    (pairs.len(), bytes)
}

/// Replace the first value of `key` and drop the rest, or append if absent.
fn replace_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter().position(|(name, _)| name == key) {
        Some(first) => {
            pairs[first].1 = value.to_string();
            let mut index = 0;
            pairs.retain(|(name, _)| {
                let keep = name != key || index == first;
                index += 1;
                keep
            });
        }
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Lay pairs out back to back in `region`, describing each in `slots`.
///
/// `slots` must hold exactly two descriptors per pair.
fn fill_pairs(pairs: &[(String, String)], slots: &mut [SliceDescriptor], region: &mut [u8]) -> RawStatus {
    if slots.len() != pairs.len() * 2 {
        warn!(slots = slots.len(), pairs = pairs.len(), "Descriptor count does not match");
        return StatusCode::InvalidContext.as_raw();
    }
    let mut offset = 0;
    for ((key, value), slot) in pairs.iter().zip(slots.chunks_exact_mut(2)) {
        for (descriptor, text) in slot.iter_mut().zip([key, value]) {
            let end = offset + text.len();
            let Some(dst) = region.get_mut(offset..end) else {
                warn!(needed = end, available = region.len(), "Copy region too small");
                return StatusCode::InvalidContext.as_raw();
            };
            dst.copy_from_slice(text.as_bytes());
            *descriptor = SliceDescriptor::new(offset, text.len());
            offset = end;
        }
    }
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::BridgeError;

    fn host_with_request() -> (MemoryHost, RequestHandle) {
        let host = MemoryHost::new();
        let request = host.register(
            RequestSnapshot::new()
                .with_header("accept", "text/html")
                .with_header("cookie", "a=1")
                .with_header("cookie", "b=2")
                .with_trailer("grpc-status", "0")
                .with_buffer(BufferId(1), "ab")
                .with_route_name("backend"),
        );
        (host, request)
    }

    fn metadata_fields() -> Struct {
        let mut fields = Struct::default();
        fields.fields.insert(
            "tenant".to_string(),
            Value {
                kind: Some(prost_types::value::Kind::StringValue("acme".to_string())),
            },
        );
        fields
    }

    #[test]
    fn test_sizes_and_copy_headers() {
        let (host, request) = host_with_request();
        let (count, bytes) = host.headers_size(&request).unwrap();
        assert_eq!(count, 3);
        assert_eq!(bytes, "accept".len() + "text/html".len() + 2 * ("cookie".len() + 3));

        let mut slots = vec![SliceDescriptor::default(); count * 2];
        let mut region = vec![0u8; bytes];
        assert_eq!(host.copy_headers(&request, &mut slots, &mut region), OK);

        let text = |d: SliceDescriptor| std::str::from_utf8(&region[d.offset..d.offset + d.len]).unwrap();
        assert_eq!(text(slots[0]), "accept");
        assert_eq!(text(slots[1]), "text/html");
        assert_eq!(text(slots[4]), "cookie");
        assert_eq!(text(slots[5]), "b=2");
    }

    #[test]
    fn test_copy_into_short_region_is_refused() {
        let (host, request) = host_with_request();
        let mut slots = vec![SliceDescriptor::default(); 6];
        let mut region = vec![0u8; 4];
        assert_eq!(
            host.copy_headers(&request, &mut slots, &mut region),
            StatusCode::InvalidContext.as_raw()
        );
    }

    #[test]
    fn test_copy_with_wrong_descriptor_count_is_refused() {
        let (host, request) = host_with_request();
        let (_, bytes) = host.headers_size(&request).unwrap();

        // One pair more than the request holds.
        let mut slots = vec![SliceDescriptor::default(); 8];
        let mut region = vec![0u8; bytes];
        assert_eq!(
            host.copy_headers(&request, &mut slots, &mut region),
            StatusCode::InvalidContext.as_raw()
        );

        let mut slots = vec![SliceDescriptor::default(); 4];
        assert_eq!(
            host.copy_headers(&request, &mut slots, &mut region),
            StatusCode::InvalidContext.as_raw()
        );
    }

    #[test]
    fn test_late_deferred_completion_ignored_by_next_read() {
        let host = MemoryHost::new().with_delivery(MetadataDelivery::Deferred(Duration::from_millis(60)));
        let request = host.register(RequestSnapshot::new().with_metadata("authz", metadata_fields()));

        let err = request
            .call_async(Operation::GetDynamicMetadata, Some(Duration::from_millis(5)), |completer| {
                host.get_dynamic_metadata(&request, "authz", AsyncBuffer::new(), completer)
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::WaitTimedOut { .. }));

        host.set_delivery(MetadataDelivery::Deferred(Duration::from_millis(120)));
        let out = AsyncBuffer::new();
        let completion = request
            .call_async(Operation::GetDynamicMetadata, Some(Duration::from_secs(5)), |completer| {
                host.get_dynamic_metadata(&request, "authz", out.clone(), completer)
            })
            .unwrap();

        assert!(completion.waited.unwrap() >= Duration::from_millis(100));
        assert_eq!(Struct::decode(out.take().as_slice()).unwrap(), metadata_fields());
    }

    #[test]
    fn test_set_header_replaces_all_values() {
        let (host, request) = host_with_request();
        host.set_header(&request, "cookie", "c=3", HeaderAction::Set);
        host.set_header(&request, "x-new", "1", HeaderAction::Add);
        host.set_header(&request, "x-new", "2", HeaderAction::Add);

        let headers = host.headers(&request).unwrap();
        let cookies: Vec<_> = headers.iter().filter(|(k, _)| k == "cookie").collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].1, "c=3");
        assert_eq!(headers.iter().filter(|(k, _)| k == "x-new").count(), 2);

        host.remove_header(&request, "x-new");
        assert!(host.headers(&request).unwrap().iter().all(|(k, _)| k != "x-new"));
    }

    #[test]
    fn test_buffer_actions() {
        for (action, expected) in [
            (BufferAction::Append, "abcd"),
            (BufferAction::Prepend, "cdab"),
            (BufferAction::Set, "cd"),
        ] {
            let (host, request) = host_with_request();
            assert_eq!(host.set_buffer(&request, BufferId(1), b"cd", action), OK);
            assert_eq!(host.buffer(&request, BufferId(1)).unwrap(), expected.as_bytes());
        }
    }

    #[test]
    fn test_get_buffer_unknown_id() {
        let (host, request) = host_with_request();
        let mut dst = [0u8; 2];
        assert_eq!(
            host.get_buffer(&request, BufferId(9), &mut dst),
            StatusCode::WrongPhase.as_raw()
        );
        assert_eq!(
            host.buffer_len(&request, BufferId(9)),
            Err(HostError::UnknownBuffer {
                request: request.raw(),
                buffer: BufferId(9)
            })
        );
    }

    #[test]
    fn test_metadata_immediate_and_missing() {
        let host = MemoryHost::new();
        let request = host.register(RequestSnapshot::new().with_metadata("authz", metadata_fields()));

        let read = |namespace: &str| {
            let out = AsyncBuffer::new();
            let completion = request
                .call_async(Operation::GetDynamicMetadata, None, |completer| {
                    host.get_dynamic_metadata(&request, namespace, out.clone(), completer)
                })
                .unwrap();
            assert_eq!(completion.waited, None);
            out.take()
        };

        assert_eq!(Struct::decode(read("authz").as_slice()).unwrap(), metadata_fields());
        assert!(read("missing").is_empty());
    }

    #[test]
    fn test_metadata_deferred_through_handle() {
        let host = MemoryHost::new().with_delivery(MetadataDelivery::Deferred(Duration::from_millis(10)));
        let request = host.register(RequestSnapshot::new().with_metadata("authz", metadata_fields()));

        let out = AsyncBuffer::new();
        let completion = request
            .call_async(Operation::GetDynamicMetadata, Some(Duration::from_secs(5)), |completer| {
                host.get_dynamic_metadata(&request, "authz", out.clone(), completer)
            })
            .unwrap();

        assert!(completion.waited.is_some());
        assert_eq!(Struct::decode(out.take().as_slice()).unwrap(), metadata_fields());
    }

    #[test]
    fn test_metadata_signal_before_return() {
        let host = MemoryHost::new().with_delivery(MetadataDelivery::SignalBeforeReturn);
        let request = host.register(RequestSnapshot::new());

        let out = AsyncBuffer::new();
        let completion = request
            .call_async(Operation::GetDynamicMetadata, None, |completer| {
                host.get_dynamic_metadata(&request, "authz", out.clone(), completer)
            })
            .unwrap();
        assert_eq!(completion.status, OK);
        assert!(out.is_written());
    }

    #[test]
    fn test_set_dynamic_metadata_rejects_garbage() {
        let (host, request) = host_with_request();
        assert_eq!(
            host.set_dynamic_metadata(&request, "authz", "k", &[0xff, 0xff]),
            StatusCode::InvalidContext.as_raw()
        );

        let value = Value {
            kind: Some(prost_types::value::Kind::NumberValue(2.0)),
        };
        assert_eq!(
            host.set_dynamic_metadata(&request, "authz", "k", &value.encode_to_vec()),
            OK
        );
        let stored = host.metadata(&request, "authz").unwrap().unwrap();
        assert_eq!(stored.fields.get("k"), Some(&value));
    }

    #[test]
    fn test_ended_request_refuses_calls() {
        let (host, request) = host_with_request();
        host.mark_gone(&request).unwrap();
        assert_eq!(
            host.remove_header(&request, "accept"),
            StatusCode::RequestGone.as_raw()
        );

        host.destroy(&request).unwrap();
        assert_eq!(
            host.continue_request(&request, FilterStatus::Continue),
            StatusCode::RequestDestroyed.as_raw()
        );
        assert!(host.continued(&request).unwrap().is_empty());
        assert_eq!(
            host.calls(&request).unwrap(),
            vec![Operation::RemoveHeader, Operation::Continue]
        );
    }

    #[test]
    fn test_destroy_wakes_pending_caller() {
        let host = MemoryHost::new().with_delivery(MetadataDelivery::Deferred(Duration::from_secs(30)));
        let request = host.register(RequestSnapshot::new());

        let err = thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                request.call_async(Operation::GetDynamicMetadata, None, |completer| {
                    host.get_dynamic_metadata(&request, "authz", AsyncBuffer::new(), completer)
                })
            });
            while request.gate().phase() != GatePhase::Armed {
                thread::yield_now();
            }
            host.destroy(&request).unwrap();
            waiter.join().unwrap().unwrap_err()
        });

        assert!(matches!(
            err,
            BridgeError::Fatal {
                status: StatusCode::RequestDestroyed,
                ..
            }
        ));
    }

    #[test]
    fn test_force_status() {
        let (host, request) = host_with_request();
        host.force_status(&request, Operation::SetTrailer, StatusCode::WrongPhase.as_raw())
            .unwrap();
        assert_eq!(
            host.set_trailer(&request, "grpc-status", "1"),
            StatusCode::WrongPhase.as_raw()
        );

        host.clear_forced(&request).unwrap();
        assert_eq!(host.set_trailer(&request, "grpc-status", "1"), OK);
        assert_eq!(
            host.trailers(&request).unwrap(),
            vec![("grpc-status".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_removed_request_reports_destroyed() {
        let (host, request) = host_with_request();
        host.remove(&request).unwrap();
        assert!(host.is_empty());
        assert_eq!(
            host.remove_header(&request, "accept"),
            StatusCode::RequestDestroyed.as_raw()
        );
        assert_eq!(host.calls(&request), Err(HostError::UnknownRequest(request.raw())));
    }

    #[test]
    fn test_local_reply_and_finalize_recorded() {
        let (host, request) = host_with_request();
        let headers = vec!["content-type".to_string(), "text/plain".to_string()];
        host.send_local_reply(&request, 403, "denied", &headers, -1, "policy");
        host.finalize(&request, FinalizeReason::Normal);

        let replies = host.replies(&request).unwrap();
        assert_eq!(replies[0].response_code, 403);
        assert_eq!(replies[0].headers, vec![("content-type".to_string(), "text/plain".to_string())]);
        assert_eq!(host.finalized(&request).unwrap(), Some(FinalizeReason::Normal));
    }
}
