//! The host operation set.

use std::sync::Arc;

use hostlink_core::{Completer, RawStatus, RequestHandle};

use crate::types::{
    AsyncBuffer, BufferAction, BufferId, FilterStatus, FinalizeReason, HeaderAction, HostString,
    SliceDescriptor, StringValueId,
};

/// Boundary operations implemented by the host.
///
/// Every method crosses into the host exactly once and reports a raw status;
/// the bridge is responsible for translating it. Destinations passed in are
/// sized by the caller and only valid for the duration of the call, except
/// for [`AsyncBuffer`], which the host may write from another thread before
/// completing a pending call through its [`Completer`].
///
/// Implementations must tolerate being called for a request that has already
/// been finished or destroyed and answer with the matching status.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait HttpCapi: Send + Sync {
    /// Resume a suspended request.
    fn continue_request(&self, request: &RequestHandle, status: FilterStatus) -> RawStatus;

    /// Terminate the request with a synthesized response.
    ///
    /// `headers` is the interleaved `key, value, key, value, ...` sequence.
    fn send_local_reply(
        &self,
        request: &RequestHandle,
        response_code: u32,
        body: &str,
        headers: &[String],
        grpc_status: i64,
        details: &str,
    ) -> RawStatus;

    /// Read one header value into `value`. Leaves it unfilled if absent.
    fn get_header(&self, request: &RequestHandle, key: &str, value: &mut HostString) -> RawStatus;

    /// Fill `2 × count` descriptors and the backing region with every header.
    fn copy_headers(
        &self,
        request: &RequestHandle,
        slots: &mut [SliceDescriptor],
        region: &mut [u8],
    ) -> RawStatus;

    /// Set or add a header value.
    fn set_header(
        &self,
        request: &RequestHandle,
        key: &str,
        value: &str,
        action: HeaderAction,
    ) -> RawStatus;

    /// Remove every value of a header.
    fn remove_header(&self, request: &RequestHandle, key: &str) -> RawStatus;

    /// Copy a body buffer into `dst`.
    fn get_buffer(&self, request: &RequestHandle, buffer: BufferId, dst: &mut [u8]) -> RawStatus;

    /// Overwrite, append to or prepend to a body buffer.
    fn set_buffer(
        &self,
        request: &RequestHandle,
        buffer: BufferId,
        data: &[u8],
        action: BufferAction,
    ) -> RawStatus;

    /// Fill `2 × count` descriptors and the backing region with every trailer.
    fn copy_trailers(
        &self,
        request: &RequestHandle,
        slots: &mut [SliceDescriptor],
        region: &mut [u8],
    ) -> RawStatus;

    /// Set a trailer value.
    fn set_trailer(&self, request: &RequestHandle, key: &str, value: &str) -> RawStatus;

    /// Read a host string value into `value`.
    fn get_string_value(
        &self,
        request: &RequestHandle,
        id: StringValueId,
        value: &mut HostString,
    ) -> RawStatus;

    /// Read the encoded dynamic metadata of `namespace` into `out`.
    ///
    /// May return `Pending`, write `out` later from a host thread and then
    /// report the final status through `completer`.
    fn get_dynamic_metadata(
        &self,
        request: &RequestHandle,
        namespace: &str,
        out: AsyncBuffer,
        completer: Completer,
    ) -> RawStatus;

    /// Store one encoded value under `namespace.key`.
    fn set_dynamic_metadata(
        &self,
        request: &RequestHandle,
        namespace: &str,
        key: &str,
        encoded: &[u8],
    ) -> RawStatus;

    /// Release the host's bookkeeping for the request. Reports no status.
    fn finalize(&self, request: &RequestHandle, reason: FinalizeReason);
}

/// A host implementation shared across requests.
pub type SharedCapi = Arc<dyn HttpCapi>;

/// Flatten header pairs into the interleaved sequence hosts expect.
pub fn flatten_pairs<'a, I>(pairs: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .flat_map(|(key, value)| [key.to_string(), value.to_string()])
        .collect()
}

/// Inverse of [`flatten_pairs`]. A trailing unpaired key is dropped.
pub fn unflatten_pairs(flat: &[String]) -> Vec<(String, String)> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::{RawRequest, StatusCode};

    #[test]
    fn test_flatten_round_trip() {
        let flat = flatten_pairs([("content-type", "text/plain"), ("x-id", "7")]);
        assert_eq!(flat, ["content-type", "text/plain", "x-id", "7"]);
        assert_eq!(
            unflatten_pairs(&flat),
            vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("x-id".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn test_unflatten_drops_odd_tail() {
        let flat = vec!["a".to_string(), "1".to_string(), "b".to_string()];
        assert_eq!(unflatten_pairs(&flat).len(), 1);
    }

    #[test]
    fn test_mock_is_object_safe() {
        let mut mock = MockHttpCapi::new();
        mock.expect_remove_header()
            .withf(|_, key| key == "x-drop")
            .times(1)
            .return_const(StatusCode::Ok.as_raw());

        let capi: SharedCapi = Arc::new(mock);
        let request = RequestHandle::new(RawRequest::new(1));
        assert_eq!(capi.remove_header(&request, "x-drop"), 0);
    }
}
