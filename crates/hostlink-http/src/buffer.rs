//! Body buffer access.

use bytes::Bytes;

use hostlink_capi::{BufferAction, BufferId};
use hostlink_core::{BridgeError, BridgeResult, Operation};

use crate::request::HttpRequest;

impl HttpRequest {
    /// Copy `len` bytes of a body buffer.
    ///
    /// `len` is the buffer length the host passed to the data callback.
    pub fn get_buffer(&self, buffer: BufferId, len: usize) -> BridgeResult<Bytes> {
        let bridge = self.bridge();
        let limit = bridge.config().max_buffer_bytes;
        if len > limit {
            let err = BridgeError::LimitExceeded {
                operation: Operation::GetBuffer,
                requested: len,
                limit,
            };
            bridge.failed(self.handle(), Operation::GetBuffer, &err);
            return Err(err);
        }

        let mut dst = vec![0u8; len];
        bridge.sync_call(self.handle(), Operation::GetBuffer, |capi| {
            capi.get_buffer(self.handle(), buffer, &mut dst)
        })?;
        bridge.metrics().record_bytes_in(Operation::GetBuffer, len);
        Ok(Bytes::from(dst))
    }

    /// Replace the content of a body buffer.
    pub fn set_buffer(&self, buffer: BufferId, data: &[u8]) -> BridgeResult<()> {
        self.write_buffer(buffer, data, BufferAction::Set)
    }

    /// Add bytes after the content of a body buffer.
    pub fn append_buffer(&self, buffer: BufferId, data: &[u8]) -> BridgeResult<()> {
        self.write_buffer(buffer, data, BufferAction::Append)
    }

    /// Add bytes before the content of a body buffer.
    pub fn prepend_buffer(&self, buffer: BufferId, data: &[u8]) -> BridgeResult<()> {
        self.write_buffer(buffer, data, BufferAction::Prepend)
    }

    /// Write to a body buffer with an explicit action.
    pub fn write_buffer(&self, buffer: BufferId, data: &[u8], action: BufferAction) -> BridgeResult<()> {
        self.bridge()
            .sync_call(self.handle(), Operation::SetBuffer, |capi| {
                capi.set_buffer(self.handle(), buffer, data, action)
            })?;
        self.bridge()
            .metrics()
            .record_bytes_out(Operation::SetBuffer, data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hostlink_capi::{MemoryHost, MockHttpCapi, RequestSnapshot};
    use hostlink_core::{BridgeConfig, RawRequest, RequestHandle, StatusCode};

    use crate::bridge::HttpBridge;

    const BODY: BufferId = BufferId(1);

    fn body_request(content: &str) -> (Arc<MemoryHost>, HttpRequest) {
        let host = Arc::new(MemoryHost::new());
        let handle = host.register(RequestSnapshot::new().with_buffer(BODY, content));
        let request = HttpBridge::new(host.clone()).request(handle);
        (host, request)
    }

    #[test]
    fn test_get_buffer() {
        let (host, request) = body_request("hello");
        let len = host.buffer_len(request.handle(), BODY).unwrap();
        assert_eq!(request.get_buffer(BODY, len).unwrap(), "hello");
        assert_eq!(request.get_buffer(BODY, 0).unwrap(), "");
    }

    #[test]
    fn test_write_actions() {
        let (host, request) = body_request("ab");
        request.append_buffer(BODY, b"cd").unwrap();
        assert_eq!(host.buffer(request.handle(), BODY).unwrap(), "abcd");

        let (host, request) = body_request("ab");
        request.prepend_buffer(BODY, b"cd").unwrap();
        assert_eq!(host.buffer(request.handle(), BODY).unwrap(), "cdab");

        let (host, request) = body_request("ab");
        request.set_buffer(BODY, b"cd").unwrap();
        assert_eq!(host.buffer(request.handle(), BODY).unwrap(), "cd");

        let snapshot = request.bridge().metrics().snapshot();
        assert_eq!(snapshot.operation(Operation::SetBuffer).bytes_out, 2);
    }

    #[test]
    fn test_get_buffer_limit() {
        let mut mock = MockHttpCapi::new();
        mock.expect_get_buffer().times(0);

        let bridge = HttpBridge::new(Arc::new(mock))
            .with_config(BridgeConfig::new().with_max_buffer_bytes(8));
        let request = bridge.request(RequestHandle::new(RawRequest::new(1)));

        let err = request.get_buffer(BODY, 9).unwrap_err();
        assert!(matches!(err, BridgeError::LimitExceeded { requested: 9, .. }));
    }

    #[test]
    fn test_wrong_phase_is_fatal_but_not_terminal() {
        let mut mock = MockHttpCapi::new();
        mock.expect_set_buffer()
            .times(2)
            .return_const(StatusCode::WrongPhase.as_raw());

        let bridge = HttpBridge::new(Arc::new(mock));
        let request = bridge.request(RequestHandle::new(RawRequest::new(1)));

        for _ in 0..2 {
            let err = request.append_buffer(BODY, b"x").unwrap_err();
            assert!(err.is_fatal());
            assert_eq!(err.status(), Some(StatusCode::WrongPhase));
        }
    }
}
