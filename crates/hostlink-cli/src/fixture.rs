//! Request fixtures: a TOML description of what the host holds for one
//! request.
//!
//! ```toml
//! route_name = "checkout"
//! headers = [[":method", "POST"], ["cookie", "a=1"], ["cookie", "b=2"]]
//! trailers = [["grpc-status", "0"]]
//!
//! [buffers]
//! 1 = "{\"items\": 3}"
//!
//! [metadata."envoy.filters.http.auth"]
//! user = "alice"
//! scopes = ["read", "write"]
//!
//! [delivery]
//! mode = "deferred"
//! delay_ms = 20
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hostlink_capi::{BufferId, MetadataDelivery, RequestSnapshot};
use hostlink_core::BridgeConfig;
use hostlink_http::metadata::to_proto_struct;

/// One request as the host would hold it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    /// Name of the matched route.
    #[serde(default)]
    pub route_name: Option<String>,
    /// Request headers in arrival order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Request trailers in arrival order.
    #[serde(default)]
    pub trailers: Vec<(String, String)>,
    /// Body buffers keyed by numeric buffer id.
    #[serde(default)]
    pub buffers: BTreeMap<String, String>,
    /// Dynamic metadata keyed by namespace.
    #[serde(default)]
    pub metadata: BTreeMap<String, Map<String, Value>>,
    /// How the host completes metadata reads.
    #[serde(default)]
    pub delivery: Delivery,
}

/// Fixture form of [`MetadataDelivery`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    /// Metadata is written and the call returns `Ok` synchronously.
    #[default]
    Immediate,
    /// The call returns `Pending` and a host thread completes it later.
    Deferred {
        /// Milliseconds the host thread sleeps before completing.
        delay_ms: u64,
    },
    /// The completion is signalled before the call returns `Pending`.
    SignalBeforeReturn,
}

impl From<Delivery> for MetadataDelivery {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Immediate => MetadataDelivery::Immediate,
            Delivery::Deferred { delay_ms } => {
                MetadataDelivery::Deferred(Duration::from_millis(delay_ms))
            }
            Delivery::SignalBeforeReturn => MetadataDelivery::SignalBeforeReturn,
        }
    }
}

/// Findings from [`Fixture::check`].
#[derive(Debug, Default, Serialize)]
pub struct FixtureReport {
    /// Problems that make the fixture unusable.
    pub errors: Vec<String>,
    /// Things a host would accept but that look like mistakes.
    pub warnings: Vec<String>,
}

impl FixtureReport {
    /// True when there are no errors. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Fixture {
    /// Parse a fixture from TOML text.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("Invalid fixture")
    }

    /// Read and parse a fixture file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Buffers with their parsed ids.
    pub fn buffer_entries(&self) -> Result<Vec<(BufferId, &str)>> {
        self.buffers
            .iter()
            .map(|(id, content)| {
                let id = id
                    .parse::<u64>()
                    .with_context(|| format!("Buffer id '{}' is not a number", id))?;
                Ok((BufferId(id), content.as_str()))
            })
            .collect()
    }

    /// Build the host-side request state.
    pub fn snapshot(&self) -> Result<RequestSnapshot> {
        let mut snapshot = RequestSnapshot::new();
        for (key, value) in &self.headers {
            snapshot = snapshot.with_header(key, value);
        }
        for (key, value) in &self.trailers {
            snapshot = snapshot.with_trailer(key, value);
        }
        for (id, content) in self.buffer_entries()? {
            snapshot = snapshot.with_buffer(id, content);
        }
        if let Some(route) = &self.route_name {
            snapshot = snapshot.with_route_name(route);
        }
        for (namespace, fields) in &self.metadata {
            if namespace.is_empty() {
                bail!("Metadata namespace must not be empty");
            }
            snapshot = snapshot.with_metadata(namespace, to_proto_struct(fields));
        }
        Ok(snapshot)
    }

    /// Check the fixture against a bridge configuration.
    ///
    /// Strict mode also warns about things a host would accept but that
    /// usually point at a mistake.
    pub fn check(&self, config: &BridgeConfig, strict: bool) -> FixtureReport {
        let mut report = FixtureReport::default();

        if let Err(e) = self.buffer_entries() {
            report.errors.push(format!("{:#}", e));
        }
        if self.metadata.contains_key("") {
            report
                .errors
                .push("Metadata namespace must not be empty".to_string());
        }
        for (key, _) in self.headers.iter().chain(&self.trailers) {
            if key.is_empty() {
                report.errors.push("Header name must not be empty".to_string());
            }
        }

        let header_bytes = wire_size(&self.headers);
        if header_bytes > config.max_header_bytes {
            report.errors.push(format!(
                "Headers take {} bytes, above the configured limit of {}",
                header_bytes, config.max_header_bytes
            ));
        }
        let trailer_bytes = wire_size(&self.trailers);
        if trailer_bytes > config.max_header_bytes {
            report.errors.push(format!(
                "Trailers take {} bytes, above the configured limit of {}",
                trailer_bytes, config.max_header_bytes
            ));
        }
        for (id, content) in &self.buffers {
            if content.len() > config.max_buffer_bytes {
                report.errors.push(format!(
                    "Buffer {} holds {} bytes, above the configured limit of {}",
                    id,
                    content.len(),
                    config.max_buffer_bytes
                ));
            }
        }

        if self.headers.is_empty() {
            report.warnings.push("Fixture has no headers".to_string());
        }

        if strict {
            if self.route_name.is_none() {
                report.warnings.push("Fixture has no route name".to_string());
            }
            for (key, _) in self.headers.iter().chain(&self.trailers) {
                if key.chars().any(|c| c.is_ascii_uppercase()) {
                    report
                        .warnings
                        .push(format!("Header name '{}' is not lower-case", key));
                }
            }
            for (namespace, fields) in &self.metadata {
                if fields.is_empty() {
                    report
                        .warnings
                        .push(format!("Metadata namespace '{}' is empty", namespace));
                }
            }
        }

        report
    }
}

/// Bytes the host needs to lay out a collection of pairs.
fn wire_size(pairs: &[(String, String)]) -> usize {
    pairs.iter().map(|(k, v)| k.len() + v.len()).sum()
}
