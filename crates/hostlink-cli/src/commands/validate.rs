//! Validate command - Check a request fixture.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use hostlink_core::BridgeConfig;

use crate::fixture::Fixture;
use crate::{OutputFormat, load_config};

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the request fixture
    #[arg(required = true)]
    pub fixture: PathBuf,

    /// Strict validation mode
    #[arg(long)]
    pub strict: bool,
}

/// Validation result.
#[derive(Debug, Serialize)]
struct ValidationResult {
    valid: bool,
    path: String,
    headers: usize,
    trailers: usize,
    buffers: usize,
    namespaces: usize,
    warnings: Vec<String>,
    errors: Vec<String>,
}

/// Execute the validate command.
pub fn execute(args: ValidateArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config)?;
    let result = validate(&args.fixture, &config, args.strict);

    match format {
        OutputFormat::Human => {
            if result.valid {
                println!("Fixture is valid: {}", args.fixture.display());
                println!("  Headers: {}", result.headers);
                println!("  Trailers: {}", result.trailers);
                println!("  Buffers: {}", result.buffers);
                println!("  Metadata namespaces: {}", result.namespaces);

                if !result.warnings.is_empty() {
                    println!("\nWarnings:");
                    for warning in &result.warnings {
                        println!("  - {}", warning);
                    }
                }
            } else {
                println!("Fixture is INVALID: {}", args.fixture.display());
                for error in &result.errors {
                    println!("  Error: {}", error);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::JsonCompact => {
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    if result.valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Validation failed"))
    }
}

fn validate(path: &Path, config: &BridgeConfig, strict: bool) -> ValidationResult {
    let mut result = ValidationResult {
        valid: true,
        path: path.display().to_string(),
        headers: 0,
        trailers: 0,
        buffers: 0,
        namespaces: 0,
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    match Fixture::load(path) {
        Ok(fixture) => {
            result.headers = fixture.headers.len();
            result.trailers = fixture.trailers.len();
            result.buffers = fixture.buffers.len();
            result.namespaces = fixture.metadata.len();

            let report = fixture.check(config, strict);
            result.valid = report.is_valid();
            result.errors = report.errors;
            result.warnings = report.warnings;
        }
        Err(e) => {
            result.valid = false;
            result.errors.push(format!("{:#}", e));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fixture(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("hostlink-{}-{}.toml", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_valid_fixture() {
        let path = write_fixture("valid", "route_name = \"a\"\nheaders = [[\"host\", \"example.com\"]]\n");
        let result = validate(&path, &BridgeConfig::default(), true);
        fs::remove_file(&path).unwrap();

        assert!(result.valid);
        assert_eq!(result.headers, 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unparseable_fixture() {
        let path = write_fixture("broken", "headers = [[\"host\"");
        let result = validate(&path, &BridgeConfig::default(), false);
        fs::remove_file(&path).unwrap();

        assert!(!result.valid);
        assert!(result.errors[0].starts_with("Invalid fixture"));
    }

    #[test]
    fn test_missing_fixture() {
        let result = validate(Path::new("/nonexistent/fixture.toml"), &BridgeConfig::default(), false);
        assert!(!result.valid);
        assert!(result.errors[0].contains("Failed to read fixture"));
    }
}
