//! Hostlink CLI - Drive the hostlink bridge against request fixtures.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hostlink_core::BridgeConfig;

mod commands;
mod fixture;

/// Hostlink HTTP Filter Bridge
#[derive(Parser)]
#[command(name = "hostlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Bridge configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Output format options.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Load a request fixture and read it back through the bridge
    Inspect(commands::inspect::InspectArgs),
    /// Check a request fixture
    Validate(commands::validate::ValidateArgs),
}

/// Load the bridge configuration, or the default one when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let config = BridgeConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    debug!(path = %path.display(), "Loaded bridge configuration");
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hostlink={}", log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Inspect(args) => commands::inspect::execute(args, config, cli.format),
        Commands::Validate(args) => commands::validate::execute(args, config, cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hostlink", "inspect", "req.toml", "--headers", "-f", "json-compact", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.format, OutputFormat::JsonCompact));
        assert!(matches!(cli.command, Commands::Inspect(ref args) if args.headers));
    }

    #[test]
    fn test_default_config() {
        let config = load_config(None).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }
}
