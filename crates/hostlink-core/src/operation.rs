//! The set of boundary operations a request handle can be used for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A boundary operation exposed by the host.
///
/// Used to label errors, log records and metrics. The set mirrors the host
/// API one to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Resume a suspended request.
    Continue,
    /// Terminate the request with a synthesized response.
    SendLocalReply,
    /// Read a single header value.
    GetHeader,
    /// Bulk copy of every request/response header.
    CopyHeaders,
    /// Set or add a single header.
    SetHeader,
    /// Remove every value of a header.
    RemoveHeader,
    /// Read a host body buffer.
    GetBuffer,
    /// Overwrite, append to or prepend to a host body buffer.
    SetBuffer,
    /// Bulk copy of every trailer.
    CopyTrailers,
    /// Set a single trailer.
    SetTrailer,
    /// Read the matched route name.
    GetRouteName,
    /// Read the dynamic metadata of a filter namespace.
    GetDynamicMetadata,
    /// Write one key of a filter namespace's dynamic metadata.
    SetDynamicMetadata,
    /// Release extension-side bookkeeping for the request.
    Finalize,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 14] = [
        Operation::Continue,
        Operation::SendLocalReply,
        Operation::GetHeader,
        Operation::CopyHeaders,
        Operation::SetHeader,
        Operation::RemoveHeader,
        Operation::GetBuffer,
        Operation::SetBuffer,
        Operation::CopyTrailers,
        Operation::SetTrailer,
        Operation::GetRouteName,
        Operation::GetDynamicMetadata,
        Operation::SetDynamicMetadata,
        Operation::Finalize,
    ];

    /// Stable snake_case name, used as a metrics key and log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Continue => "continue",
            Operation::SendLocalReply => "send_local_reply",
            Operation::GetHeader => "get_header",
            Operation::CopyHeaders => "copy_headers",
            Operation::SetHeader => "set_header",
            Operation::RemoveHeader => "remove_header",
            Operation::GetBuffer => "get_buffer",
            Operation::SetBuffer => "set_buffer",
            Operation::CopyTrailers => "copy_trailers",
            Operation::SetTrailer => "set_trailer",
            Operation::GetRouteName => "get_route_name",
            Operation::GetDynamicMetadata => "get_dynamic_metadata",
            Operation::SetDynamicMetadata => "set_dynamic_metadata",
            Operation::Finalize => "finalize",
        }
    }

    /// Whether the host may answer this operation with `Pending`.
    pub fn may_pend(&self) -> bool {
        matches!(self, Operation::GetDynamicMetadata)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Operation::ALL.iter().map(Operation::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Operation::ALL.len());
    }

    #[test]
    fn test_only_metadata_get_may_pend() {
        let pending: Vec<_> = Operation::ALL.iter().filter(|op| op.may_pend()).collect();
        assert_eq!(pending, vec![&Operation::GetDynamicMetadata]);
    }
}
