//! # js8bridge CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证（文件 + 环境变量 / 命令行覆盖）
//! - Bridge 编排、SIGHUP 热加载与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod config;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{run_bridge, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "js8bridge starting");

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => run_bridge(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging based on CLI options
///
/// `-q` wins over `RUST_LOG`; otherwise `RUST_LOG` wins over `-v`.
fn init_logging(cli: &Cli) -> Result<()> {
    let format: observability::LogFormat = cli.log_format.into();
    if cli.quiet {
        return observability::init_tracing_with_filter(format, EnvFilter::new("warn"));
    }

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    observability::init_tracing(format, default_level)
}
