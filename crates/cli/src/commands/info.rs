//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{BackoffConfig, BridgeConfig, SinkConfig, StationConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::cli::InfoArgs;
use crate::config::{load_config, resolve_source};

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    source: SourceInfo,
    station: StationConfig,
    backoff: BackoffConfig,
    channel_capacity: usize,
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct SourceInfo {
    transport: String,
    address: String,
    framing: String,
    max_frame_len: usize,
    idle_timeout_ms: u64,
    poll_interval_ms: u64,
    grid_length: usize,
    backoff: Option<BackoffConfig>,
}

#[derive(Serialize)]
struct SinkInfo {
    id: String,
    enabled: bool,
    transport: String,
    address: String,
    encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<SinkDetails>,
}

#[derive(Serialize)]
struct SinkDetails {
    queue_capacity: usize,
    connect_timeout_ms: u64,
    write_timeout_ms: u64,
    backoff: BackoffConfig,
    kinds: Vec<String>,
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = load_config(&args.config, &args.source.overrides())
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args.sinks);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args.sinks);
    }

    Ok(())
}

fn build_config_info(config: &BridgeConfig, details: bool) -> ConfigInfo {
    let source = resolve_source(config);

    ConfigInfo {
        version: format!("{:?}", config.version),
        source: SourceInfo {
            transport: source.transport.to_string(),
            address: source.address(),
            framing: format!("{:?}", source.framing),
            max_frame_len: source.max_frame_len,
            idle_timeout_ms: source.idle_timeout_ms,
            poll_interval_ms: source.poll_interval_ms,
            grid_length: source.grid_length,
            backoff: source.backoff,
        },
        station: config.station.clone(),
        backoff: config.backoff,
        channel_capacity: config.channel_capacity,
        sinks: config
            .sinks
            .iter()
            .map(|sink| SinkInfo {
                id: sink.id.clone(),
                enabled: sink.enabled,
                transport: sink.link(),
                address: sink.target(),
                encoding: sink.encoding.to_string(),
                details: details.then(|| sink_details(sink, &config.backoff)),
            })
            .collect(),
    }
}

fn sink_details(sink: &SinkConfig, default_backoff: &BackoffConfig) -> SinkDetails {
    SinkDetails {
        queue_capacity: sink.queue_capacity,
        connect_timeout_ms: sink.connect_timeout_ms,
        write_timeout_ms: sink.write_timeout_ms,
        backoff: sink.backoff.unwrap_or(*default_backoff),
        kinds: sink.kinds.iter().map(|kind| kind.as_str().to_string()).collect(),
        params: sink
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

fn print_config_info(config: &BridgeConfig, details: bool) {
    let info = build_config_info(config, details);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 js8bridge Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let source = &info.source;
    println!("📡 Source");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Endpoint: {} {}", source.transport, source.address);
    println!("   ├─ Framing: {} (max {} bytes)", source.framing, source.max_frame_len);
    println!("   ├─ Idle timeout: {}ms", source.idle_timeout_ms);
    if source.poll_interval_ms > 0 {
        println!("   ├─ Poll interval: {}ms", source.poll_interval_ms);
    } else {
        println!("   ├─ Poll interval: disabled");
    }
    println!("   ├─ Grid precision: {}", source.grid_length);
    println!("   └─ Channel capacity: {}", info.channel_capacity);

    let station = &info.station;
    println!("\n📻 Station");
    println!("   ├─ Callsign: {}", station.callsign.as_deref().unwrap_or("-"));
    println!("   ├─ Operator: {}", station.operator.as_deref().unwrap_or("-"));
    println!("   └─ Grid: {}", station.grid.as_deref().unwrap_or("-"));

    println!("\n🔁 Backoff");
    println!(
        "   └─ {}ms → {}ms (x{}), stable after {}ms",
        info.backoff.initial_ms,
        info.backoff.max_ms,
        info.backoff.multiplier,
        info.backoff.stable_after_ms
    );

    println!("\n📤 Sinks ({})", info.sinks.len());
    for (i, sink) in info.sinks.iter().enumerate() {
        let is_last = i == info.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };
        let disabled = if sink.enabled { "" } else { " [disabled]" };

        println!(
            "   {} {} → {} {} ({}){}",
            prefix, sink.id, sink.transport, sink.address, sink.encoding, disabled
        );

        if let Some(ref details) = sink.details {
            let kinds = if details.kinds.is_empty() {
                "all".to_string()
            } else {
                details.kinds.join(", ")
            };
            println!("   {}  ├─ Kinds: {}", child_prefix, kinds);
            println!(
                "   {}  ├─ Queue: {}, connect {}ms, write {}ms",
                child_prefix,
                details.queue_capacity,
                details.connect_timeout_ms,
                details.write_timeout_ms
            );
            for (key, value) in &details.params {
                println!("   {}  ├─ {} = {}", child_prefix, key, value);
            }
            println!(
                "   {}  └─ Backoff: {}ms → {}ms",
                child_prefix, details.backoff.initial_ms, details.backoff.max_ms
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Encoding, EventKind, Transport};

    #[test]
    fn test_build_info_details() {
        let mut sink = SinkConfig::new("ticker", Transport::Udp, "127.0.0.1", 9000, Encoding::Line);
        sink.kinds = vec![EventKind::StationHeard];
        let config = BridgeConfig {
            sinks: vec![sink],
            ..BridgeConfig::default()
        };

        let summary = build_config_info(&config, false);
        assert!(summary.sinks[0].details.is_none());
        assert_eq!(summary.source.backoff, Some(config.backoff));

        let detailed = build_config_info(&config, true);
        let details = detailed.sinks[0].details.as_ref().unwrap();
        assert_eq!(details.kinds, vec!["station_heard".to_string()]);
        assert_eq!(details.backoff, config.backoff);

        let json = serde_json::to_value(&detailed).unwrap();
        assert_eq!(json["sinks"][0]["encoding"], "line");
        assert_eq!(json["source"]["address"], "127.0.0.1:2171");
    }
}
