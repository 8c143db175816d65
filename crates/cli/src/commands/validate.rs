//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{BridgeConfig, Transport};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::config::load_config;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sink_errors: Vec<SinkError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

/// A sink that will not start; the rest of the file is still usable
#[derive(Serialize)]
struct SinkError {
    id: String,
    error: String,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    source: String,
    transport: String,
    sink_count: usize,
    enabled_sinks: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_config(&args.config, &args.source.overrides()) {
        Ok(config) => {
            let sink_errors = collect_sink_errors(&config);
            ValidationResult {
                valid: sink_errors.is_empty(),
                config_path,
                error: None,
                sink_errors,
                warnings: collect_warnings(&config),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    source: config.source.address(),
                    transport: config.source.transport.to_string(),
                    sink_count: config.sinks.len(),
                    enabled_sinks: config.enabled_sinks().count(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            sink_errors: Vec::new(),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

/// Field rules plus encoder parameters (e.g. line templates)
fn collect_sink_errors(config: &BridgeConfig) -> Vec<SinkError> {
    let mut errors: Vec<SinkError> = config_loader::sink_issues(config)
        .into_iter()
        .map(|(id, e)| SinkError {
            id,
            error: e.to_string(),
        })
        .collect();

    for sink in &config.sinks {
        if errors.iter().any(|e| e.id == sink.id) {
            continue;
        }
        if let Err(e) = dispatcher::encoder_for(sink, &config.station) {
            errors.push(SinkError {
                id: sink.id.clone(),
                error: e.to_string(),
            });
        }
    }
    errors
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &BridgeConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.sinks.is_empty() {
        warnings.push("No sinks configured - decoded events will be discarded".to_string());
    }

    for sink in config.sinks.iter().filter(|sink| !sink.enabled) {
        warnings.push(format!("Sink '{}' is disabled", sink.id));
    }

    for sink in config.sinks.iter().filter(|sink| sink.is_file() && !sink.host.is_empty()) {
        warnings.push(format!(
            "Sink '{}' writes to a file - host and port are ignored",
            sink.id
        ));
    }

    if config.source.transport == Transport::Udp && config.source.poll_interval_ms > 0 {
        warnings.push("source.poll_interval_ms is ignored for UDP sources".to_string());
    }

    let has_adif = config
        .enabled_sinks()
        .any(|sink| sink.encoding == contracts::Encoding::Adif);
    if has_adif && config.station.callsign.is_none() {
        warnings.push(
            "station.callsign is not set - ADIF records will omit STATION_CALLSIGN".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }

    if let Some(ref summary) = result.summary {
        println!("\n  Version: {}", summary.version);
        println!("  Source: {} {}", summary.transport, summary.source);
        println!(
            "  Sinks: {} ({} enabled)",
            summary.sink_count, summary.enabled_sinks
        );
    }

    if !result.sink_errors.is_empty() {
        println!("\n✗ Sinks that will not start:");
        for sink in &result.sink_errors {
            println!("  - {}: {}", sink.id, sink.error);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }
}
