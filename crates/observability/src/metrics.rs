//! Bridge 指标记录
//!
//! 通过 `metrics` facade 记录；未安装 recorder 时为空操作。

use contracts::{ConnectionState, EventKind};
use metrics::{counter, gauge};

/// 记录连接状态变化
pub fn record_connection_state(id: &str, state: ConnectionState) {
    gauge!("js8bridge_connection_state", "id" => id.to_string()).set(state.as_gauge());
    counter!(
        "js8bridge_connection_transitions_total",
        "id" => id.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// 记录 source 读取的字节数
pub fn record_source_bytes(bytes: usize) {
    counter!("js8bridge_source_bytes_total").increment(bytes as u64);
}

/// 记录翻译成功的事件
pub fn record_event_received(kind: EventKind) {
    counter!("js8bridge_events_received_total", "kind" => kind.as_str()).increment(1);
}

/// 记录无法解码的帧
pub fn record_decode_error() {
    counter!("js8bridge_decode_errors_total").increment(1);
}

/// 记录被忽略的帧（未知类型）
pub fn record_frame_ignored() {
    counter!("js8bridge_frames_ignored_total").increment(1);
}

/// 记录事件写入 sink
pub fn record_event_dispatched(sink_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "js8bridge_events_dispatched_total",
        "sink" => sink_id.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录编码跳过（该 sink 无对应表示）
pub fn record_event_skipped(sink_id: &str) {
    counter!("js8bridge_events_skipped_total", "sink" => sink_id.to_string()).increment(1);
}

/// 记录队列满导致的丢弃
pub fn record_sink_dropped(sink_id: &str) {
    counter!("js8bridge_events_dropped_total", "sink" => sink_id.to_string()).increment(1);
}

/// 记录 sink 断线期间错过的事件
pub fn record_sink_missed(sink_id: &str, count: u64) {
    counter!("js8bridge_events_missed_total", "sink" => sink_id.to_string()).increment(count);
}
