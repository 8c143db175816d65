//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::Transport;
use std::path::PathBuf;

use crate::config::SourceOverrides;

/// js8bridge - fan JS8Call decodes out to mapping and logging tools
#[derive(Parser, Debug)]
#[command(
    name = "js8bridge",
    author,
    version,
    about = "JS8Call telemetry bridge",
    long_about = "Connects to the JS8Call socket API, decodes station spots, grid and \n\
                  frequency reports, and forwards them to any number of TCP/UDP sinks \n\
                  (ADIF loggers, GridTracker, N1MM+, ...) each in its own encoding."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "JS8BRIDGE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "JS8BRIDGE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge until interrupted
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Source endpoint overrides shared by every command
#[derive(Parser, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Override the JS8Call host from configuration
    #[arg(long, env = "JS8BRIDGE_SOURCE_HOST")]
    pub source_host: Option<String>,

    /// Override the JS8Call API port from configuration
    #[arg(long, env = "JS8BRIDGE_SOURCE_PORT")]
    pub source_port: Option<u16>,

    /// Override the source transport from configuration
    #[arg(long, value_enum, env = "JS8BRIDGE_SOURCE_TRANSPORT")]
    pub transport: Option<TransportArg>,
}

impl SourceArgs {
    pub fn overrides(&self) -> SourceOverrides {
        SourceOverrides {
            host: self.source_host.clone(),
            port: self.source_port,
            transport: self.transport.map(Transport::from),
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = config_loader::DEFAULT_CONFIG_FILE,
        env = "JS8BRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Seconds between health reports in the log (0 = disabled)
    #[arg(long, default_value = "60", env = "JS8BRIDGE_STATUS_INTERVAL")]
    pub status_interval: u64,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value = "0", env = "JS8BRIDGE_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "JS8BRIDGE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(
        short,
        long,
        default_value = config_loader::DEFAULT_CONFIG_FILE,
        env = "JS8BRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = config_loader::DEFAULT_CONFIG_FILE,
        env = "JS8BRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-sink details (filters, timeouts, parameters)
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Source transport
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportArg {
    Tcp,
    Udp,
}

impl From<TransportArg> for Transport {
    fn from(transport: TransportArg) -> Self {
        match transport {
            TransportArg::Tcp => Transport::Tcp,
            TransportArg::Udp => Transport::Udp,
        }
    }
}
