//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标 + 连接健康状态。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出
//! - `HealthRegistry`：source 与每个 sink 的连接状态汇总
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{HealthRegistry, LogFormat};
//!
//! observability::init_tracing(LogFormat::Compact, "info")?;
//! observability::init_metrics_only(9000)?;
//!
//! let registry = HealthRegistry::new();
//! let reader = registry.reader();
//! for (id, entry) in reader.snapshot().iter() {
//!     println!("{id}: {}", entry.state);
//! }
//! ```

pub mod health;
pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::health::{HealthEntry, HealthReader, HealthRegistry, HealthSnapshot, Transition};
pub use crate::metrics::{
    record_connection_state, record_decode_error, record_event_dispatched, record_event_received,
    record_event_skipped, record_frame_ignored, record_sink_dropped, record_sink_missed,
    record_source_bytes,
};

/// 日志格式
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 初始化 Tracing
///
/// `RUST_LOG` 优先于 `default_level`。
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    init_tracing_with_filter(format, filter)
}

/// 使用给定的 EnvFilter 初始化 Tracing
pub fn init_tracing_with_filter(format: LogFormat, filter: EnvFilter) -> Result<()> {
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")
}

/// 初始化 Prometheus 指标导出 (0.0.0.0:`port`)
///
/// 必须在 Tokio runtime 内调用。
pub fn init_metrics_only(port: u16) -> Result<()> {
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
