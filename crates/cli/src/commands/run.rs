//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::cli::RunArgs;
use crate::config::load_config;
use crate::error::CliError;
use crate::pipeline::{Bridge, BridgeOptions};

/// Execute the `run` command
pub async fn run_bridge(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let overrides = args.source.overrides();
    let config = load_config(&args.config, &overrides)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        source = %config.source.address(),
        transport = %config.source.transport,
        sinks = config.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    // Initialize Metrics (optional)
    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let options = BridgeOptions {
        config_path: args.config.clone(),
        overrides,
        status_interval: (args.status_interval != 0)
            .then(|| Duration::from_secs(args.status_interval)),
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
    };

    let reload = reload_signal()?;
    let bridge = Bridge::new(config, options);

    info!("Starting bridge...");
    let stats = bridge
        .run(shutdown_signal(), reload)
        .await
        .context("Bridge execution failed")?;

    stats.print_summary();
    info!("js8bridge finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// One message per SIGHUP; bursts collapse into a single reload
fn reload_signal() -> Result<mpsc::Receiver<()>, CliError> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        use tokio::sync::mpsc::error::TrySendError;

        let mut hangup =
            signal(SignalKind::hangup()).map_err(|e| CliError::signal("SIGHUP", e))?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("Received SIGHUP, reloading configuration");
                if let Err(TrySendError::Closed(())) = tx.try_send(()) {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &contracts::BridgeConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Source:");
    println!(
        "  {} {} ({:?} framing)",
        config.source.transport,
        config.source.address(),
        config.source.framing
    );
    if let Some(ref call) = config.station.callsign {
        println!("\nStation: {call}");
    }

    if !config.sinks.is_empty() {
        println!("\nSinks ({}):", config.sinks.len());
        for sink in &config.sinks {
            let state = if sink.enabled { "" } else { " [disabled]" };
            println!(
                "  - {} -> {} {} ({}){state}",
                sink.id,
                sink.link(),
                sink.target(),
                sink.encoding
            );
        }
    }

    println!();
}
