//! Inspect command - Read a request fixture back through the bridge.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use hostlink::HostLink;
use hostlink_capi::{FinalizeReason, MemoryHost};
use hostlink_core::BridgeConfig;
use hostlink_http::HeaderCollection;
use hostlink_observe::MetricsSnapshot;

use crate::fixture::Fixture;
use crate::{OutputFormat, load_config};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Path to the request fixture
    #[arg(required = true)]
    pub fixture: PathBuf,

    /// Show headers
    #[arg(long)]
    pub headers: bool,

    /// Show trailers
    #[arg(long)]
    pub trailers: bool,

    /// Show body buffers
    #[arg(long)]
    pub buffers: bool,

    /// Show dynamic metadata
    #[arg(long)]
    pub metadata: bool,

    /// Show all information
    #[arg(long, short)]
    pub all: bool,

    /// Show bridge metrics for the inspection
    #[arg(long)]
    pub metrics: bool,
}

/// Sections to read back.
#[derive(Debug, Clone, Copy, Default)]
struct Sections {
    headers: bool,
    trailers: bool,
    buffers: bool,
    metadata: bool,
    metrics: bool,
}

impl Sections {
    fn from_args(args: &InspectArgs) -> Self {
        let show_all = args.all || (!args.headers && !args.trailers && !args.buffers && !args.metadata);
        Self {
            headers: show_all || args.headers,
            trailers: show_all || args.trailers,
            buffers: show_all || args.buffers,
            metadata: show_all || args.metadata,
            metrics: args.metrics,
        }
    }
}

/// Inspection result.
#[derive(Debug, Serialize)]
struct InspectionResult {
    path: String,
    route_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<HeaderCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trailers: Option<HeaderCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffers: Option<Vec<BufferDisplay>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, Map<String, Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricsSnapshot>,
}

#[derive(Debug, Serialize)]
struct BufferDisplay {
    id: u64,
    len: usize,
    content: String,
}

/// Execute the inspect command.
pub fn execute(args: InspectArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config)?;
    let fixture = Fixture::load(&args.fixture)?;

    let mut result = inspect(&fixture, config, Sections::from_args(&args))?;
    result.path = args.fixture.display().to_string();

    match format {
        OutputFormat::Human => print_human(&result),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

/// Load `fixture` into an in-memory host and read the requested sections
/// back through a bridge.
fn inspect(fixture: &Fixture, config: BridgeConfig, sections: Sections) -> Result<InspectionResult> {
    let host = Arc::new(MemoryHost::new().with_delivery(fixture.delivery.into()));
    let bridge = HostLink::builder()
        .with_capi(host.clone())
        .with_config(config)
        .with_event_logging()
        .build()
        .context("Failed to create bridge")?;

    let handle = host.register(fixture.snapshot()?);
    let request = bridge.request(handle.clone());
    info!(request = %handle.raw(), "Fixture registered");

    let mut result = InspectionResult {
        path: String::new(),
        route_name: request
            .get_route_name()
            .context("Failed to read route name")?,
        headers: None,
        trailers: None,
        buffers: None,
        metadata: None,
        metrics: None,
    };

    if sections.headers {
        let (count, bytes) = host.headers_size(&handle)?;
        result.headers = Some(
            request
                .copy_headers(count, bytes)
                .context("Failed to copy headers")?,
        );
    }

    if sections.trailers {
        let (count, bytes) = host.trailers_size(&handle)?;
        result.trailers = Some(
            request
                .copy_trailers(count, bytes)
                .context("Failed to copy trailers")?,
        );
    }

    if sections.buffers {
        let mut buffers = Vec::new();
        for id in host.buffer_ids(&handle)? {
            let len = host.buffer_len(&handle, id)?;
            let content = request
                .get_buffer(id, len)
                .with_context(|| format!("Failed to read {}", id))?;
            buffers.push(BufferDisplay {
                id: id.0,
                len,
                content: String::from_utf8_lossy(&content).into_owned(),
            });
        }
        result.buffers = Some(buffers);
    }

    if sections.metadata {
        let mut metadata = BTreeMap::new();
        for namespace in fixture.metadata.keys() {
            let fields = request
                .get_dynamic_metadata(namespace)
                .with_context(|| format!("Failed to read metadata namespace '{}'", namespace))?;
            metadata.insert(namespace.clone(), fields);
        }
        result.metadata = Some(metadata);
    }

    request.finalize(FinalizeReason::Normal);

    if sections.metrics {
        result.metrics = Some(bridge.metrics().snapshot());
    }

    Ok(result)
}

fn print_human(result: &InspectionResult) {
    println!("Fixture: {}", result.path);
    if !result.route_name.is_empty() {
        println!("Route: {}", result.route_name);
    }
    println!();

    if let Some(headers) = &result.headers {
        println!("Headers ({}):", headers.len());
        for (name, value) in headers.pairs() {
            println!("  {}: {}", name, value);
        }
        println!();
    }

    if let Some(trailers) = &result.trailers {
        println!("Trailers ({}):", trailers.len());
        for (name, value) in trailers.pairs() {
            println!("  {}: {}", name, value);
        }
        println!();
    }

    if let Some(buffers) = &result.buffers {
        println!("Buffers ({}):", buffers.len());
        for buffer in buffers {
            println!("  [{}] {} bytes: {}", buffer.id, buffer.len, buffer.content);
        }
        println!();
    }

    if let Some(metadata) = &result.metadata {
        println!("Metadata ({} namespaces):", metadata.len());
        for (namespace, fields) in metadata {
            println!("  {}", namespace);
            for (key, value) in fields {
                println!("    {} = {}", key, value);
            }
        }
        println!();
    }

    if let Some(metrics) = &result.metrics {
        println!("Metrics:");
        print!("{}", metrics.to_text());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::Operation;
    use serde_json::json;

    const FIXTURE: &str = r#"
route_name = "checkout"
headers = [[":path", "/cart"], ["cookie", "a=1"], ["cookie", "b=2"]]
trailers = [["grpc-status", "0"]]

[buffers]
1 = "hello"

[metadata."envoy.lb"]
canary = true
weight = 0.25

[delivery]
mode = "deferred"
delay_ms = 5
"#;

    fn all_sections() -> Sections {
        Sections {
            headers: true,
            trailers: true,
            buffers: true,
            metadata: true,
            metrics: true,
        }
    }

    #[test]
    fn test_inspect_everything() {
        let fixture = Fixture::from_toml_str(FIXTURE).unwrap();
        let result = inspect(&fixture, BridgeConfig::default(), all_sections()).unwrap();

        assert_eq!(result.route_name, "checkout");
        let headers = result.headers.unwrap();
        assert_eq!(headers.get_all("cookie"), ["a=1", "b=2"]);
        assert_eq!(result.trailers.unwrap().get("grpc-status"), Some("0"));

        let buffers = result.buffers.unwrap();
        assert_eq!(buffers[0].content, "hello");

        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["envoy.lb"]["canary"], json!(true));
        assert_eq!(metadata["envoy.lb"]["weight"], json!(0.25));

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.operation(Operation::GetDynamicMetadata).calls, 1);
        assert_eq!(metrics.waits.pending_waits, 1);
        assert_eq!(metrics.operation(Operation::Finalize).calls, 1);
    }

    #[test]
    fn test_inspect_selected_sections() {
        let fixture = Fixture::from_toml_str(FIXTURE).unwrap();
        let sections = Sections {
            headers: true,
            ..Sections::default()
        };
        let result = inspect(&fixture, BridgeConfig::default(), sections).unwrap();

        assert!(result.headers.is_some());
        assert!(result.trailers.is_none());
        assert!(result.metrics.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("buffers").is_none());
        assert_eq!(json["headers"]["cookie"], json!(["a=1", "b=2"]));
    }

    #[test]
    fn test_inspect_limit_error() {
        let fixture = Fixture::from_toml_str(FIXTURE).unwrap();
        let config = BridgeConfig::new().with_max_header_bytes(4);

        let err = inspect(&fixture, config, all_sections()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to copy headers"));
    }
}
