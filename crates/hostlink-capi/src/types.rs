//! Value types exchanged with the host.
//!
//! The discriminants of the `#[repr]` enums are part of the host ABI.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Status passed to the host when a suspended request is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u64)]
pub enum FilterStatus {
    /// The extension is still running.
    Running = 0,
    /// The extension already sent a local reply.
    LocalReply = 1,
    /// Continue to the next filter.
    Continue = 2,
    /// Stop and buffer the body.
    StopAndBuffer = 3,
    /// Stop and buffer the body, honouring watermarks.
    StopAndBufferWatermark = 4,
    /// Stop without buffering.
    StopNoBuffer = 5,
}

impl FilterStatus {
    /// The value the host expects.
    pub fn as_raw(self) -> u64 {
        self as u64
    }
}

/// Why a request is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum FinalizeReason {
    /// The extension finished with the request.
    Normal = 0,
    /// The request was dropped without an explicit finalize.
    Dropped = 1,
}

impl FinalizeReason {
    /// The value the host expects.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// How a header or trailer write treats existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum HeaderAction {
    /// Replace every existing value.
    Set = 0,
    /// Append another value.
    Add = 1,
}

/// How a body buffer write combines with the existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum BufferAction {
    /// Replace the content.
    Set = 0,
    /// Add after the content.
    Append = 1,
    /// Add before the content.
    Prepend = 2,
}

/// Host-scalar values readable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum StringValueId {
    /// Name of the matched route.
    RouteName = 1,
}

/// Host token for a body buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// A `(offset, len)` view into a backing byte region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceDescriptor {
    /// Start offset in bytes.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl SliceDescriptor {
    /// Create a descriptor.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Exclusive end offset, `None` on overflow.
    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }
}

/// Destination for a string the host only lends for the duration of a call.
///
/// The host fills it from its borrowed slice before returning; the bytes are
/// copied on the way in so nothing aliases host memory afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostString {
    bytes: Option<Vec<u8>>,
}

impl HostString {
    /// Create an empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the host's bytes in.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.bytes = Some(bytes.to_vec());
    }

    /// Whether the host provided a value.
    pub fn is_filled(&self) -> bool {
        self.bytes.is_some()
    }

    /// Take the copied bytes.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.bytes
    }
}

/// Destination for a result the host may write from another thread.
///
/// Clones share the same slot. The host writes before delivering the
/// completion; the bridge reads after the completion has been observed.
#[derive(Debug, Clone, Default)]
pub struct AsyncBuffer {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl AsyncBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result, replacing any earlier one.
    pub fn write(&self, bytes: Vec<u8>) {
        *self.slot.lock() = Some(bytes);
    }

    /// Remove the result. An unwritten buffer reads as empty.
    pub fn take(&self) -> Vec<u8> {
        self.slot.lock().take().unwrap_or_default()
    }

    /// Whether a result has been stored.
    pub fn is_written(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_discriminants() {
        assert_eq!(FilterStatus::Running.as_raw(), 0);
        assert_eq!(FilterStatus::StopNoBuffer.as_raw(), 5);
        assert_eq!(FinalizeReason::Dropped.as_raw(), 1);
        assert_eq!(HeaderAction::Add as i32, 1);
        assert_eq!(BufferAction::Prepend as i32, 2);
        assert_eq!(StringValueId::RouteName as i32, 1);
    }

    #[test]
    fn test_slice_descriptor_end() {
        assert_eq!(SliceDescriptor::new(3, 4).end(), Some(7));
        assert_eq!(SliceDescriptor::new(usize::MAX, 1).end(), None);
    }

    #[test]
    fn test_host_string() {
        let mut value = HostString::new();
        assert!(!value.is_filled());

        let borrowed = String::from("backend");
        value.fill(borrowed.as_bytes());
        drop(borrowed);

        assert_eq!(value.into_bytes().as_deref(), Some(&b"backend"[..]));
    }

    #[test]
    fn test_async_buffer_shared_between_clones() {
        let buffer = AsyncBuffer::new();
        let host_side = buffer.clone();
        assert!(!buffer.is_written());

        host_side.write(vec![1, 2, 3]);
        assert!(buffer.is_written());
        assert_eq!(buffer.take(), vec![1, 2, 3]);
        assert!(buffer.take().is_empty());
    }
}
