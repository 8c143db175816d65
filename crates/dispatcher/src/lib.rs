//! # Dispatcher
//!
//! 事件分发模块。
//!
//! 负责：
//! - 消费 source 的 `SharedEvent`
//! - Fan-out 到多个独立连接的 sinks（仅 Connected 的 sink 接收）
//! - 每个 sink 独立的队列、编码、重连与退避
//! - 隔离慢/故障 sink，不阻塞主链路

pub mod connector;
pub mod dispatcher;
pub mod encoders;
pub mod error;
pub mod metrics;
pub mod sinks;

pub use connector::{SendOutcome, SinkConnector, SinkSettings};
pub use contracts::{EventEncoder, EventSink, SharedEvent};
pub use dispatcher::{ApplyReport, DispatchStats, Dispatcher, PublishReport, SinkDefaults};
pub use encoders::{encoder_for, AdifEncoder, JsonEncoder, LineEncoder, RawEncoder};
pub use error::DispatcherError;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, NetworkSink};
