//! Locally synthesized responses.

use serde::{Deserialize, Serialize};

use hostlink_capi::flatten_pairs;

/// gRPC status value meaning "not a gRPC reply".
pub const NO_GRPC_STATUS: i64 = -1;

/// A response the extension asks the host to send instead of forwarding the
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReply {
    /// HTTP status code.
    pub response_code: u32,
    /// Response body.
    #[serde(default)]
    pub body: String,
    /// Response headers in the order they are sent.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// gRPC status, [`NO_GRPC_STATUS`] when not applicable.
    #[serde(default = "no_grpc_status")]
    pub grpc_status: i64,
    /// Details string recorded by the host.
    #[serde(default)]
    pub details: String,
}

fn no_grpc_status() -> i64 {
    NO_GRPC_STATUS
}

impl LocalReply {
    /// Create an empty reply with the given status code.
    pub fn new(response_code: u32) -> Self {
        Self {
            response_code,
            body: String::new(),
            headers: Vec::new(),
            grpc_status: NO_GRPC_STATUS,
            details: String::new(),
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the gRPC status.
    pub fn with_grpc_status(mut self, status: i64) -> Self {
        self.grpc_status = status;
        self
    }

    /// Set the details string.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Headers as the interleaved sequence the host expects.
    pub fn flattened_headers(&self) -> Vec<String> {
        flatten_pairs(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Bytes handed to the host.
    pub fn wire_len(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.body.len() + headers + self.details.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_reply_builder() {
        let reply = LocalReply::new(503)
            .with_body("unavailable")
            .with_header("content-type", "text/plain")
            .with_header("x-reason", "drain")
            .with_grpc_status(14);

        assert_eq!(
            reply.flattened_headers(),
            ["content-type", "text/plain", "x-reason", "drain"]
        );
        assert_eq!(reply.grpc_status, 14);
        assert_eq!(reply.wire_len(), 11 + 22 + 13);
    }

    #[test]
    fn test_local_reply_defaults_from_json() {
        let reply: LocalReply = serde_json::from_str(r#"{"response_code": 404}"#).unwrap();
        assert_eq!(reply, LocalReply::new(404));
    }
}
