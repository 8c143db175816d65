//! Bridge statistics and the health table.

use std::fmt::Write as _;
use std::time::Duration;

use dispatcher::{DispatchStats, MetricsSnapshot};
use ingestion::SourceMetricsSnapshot;
use observability::HealthSnapshot;

/// Statistics from a bridge run
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Total duration of the run
    pub duration: Duration,

    /// Source counters
    pub source: SourceMetricsSnapshot,

    /// Dispatcher totals
    pub dispatch: DispatchStats,

    /// Per-sink counters, taken just before shutdown
    pub sinks: Vec<(String, MetricsSnapshot)>,

    /// Final connection health
    pub health: HealthSnapshot,
}

impl BridgeStats {
    /// Translated events per minute
    pub fn events_per_minute(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.source.events as f64 * 60.0 / secs
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        print!("{}", self.render_summary());
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n=== Bridge Statistics ===\n");
        let _ = writeln!(out, "Source");
        let _ = writeln!(out, "   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        let _ = writeln!(out, "   ├─ Sessions: {}", self.source.sessions);
        let _ = writeln!(out, "   ├─ Bytes received: {}", self.source.bytes_received);
        let _ = writeln!(out, "   ├─ Frames: {}", self.source.frames);
        let _ = writeln!(
            out,
            "   ├─ Events: {} ({:.1}/min)",
            self.source.events,
            self.events_per_minute()
        );
        let _ = writeln!(out, "   ├─ Decode errors: {}", self.source.decode_errors);
        let _ = writeln!(out, "   ├─ Ignored frames: {}", self.source.frames_ignored);
        let _ = writeln!(out, "   └─ Dropped (channel full): {}", self.source.events_dropped);

        let _ = writeln!(out, "\nDispatcher");
        let _ = writeln!(out, "   ├─ Published: {}", self.dispatch.published);
        let _ = writeln!(out, "   ├─ Queued: {}", self.dispatch.queued);
        let _ = writeln!(out, "   └─ Dropped (queue full): {}", self.dispatch.dropped);

        if !self.sinks.is_empty() {
            let _ = writeln!(out, "\nSinks");
            for (i, (id, m)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "└─" } else { "├─" };
                let _ = writeln!(
                    out,
                    "   {prefix} {id}: written={} skipped={} missed={} dropped={} failures={} connects={}",
                    m.write_count,
                    m.skipped_count,
                    m.missed_count,
                    m.dropped_count,
                    m.failure_count,
                    m.connect_count
                );
            }
        }

        let _ = writeln!(out, "\nConnections");
        out.push_str(&render_health_table(&self.health));
        out
    }
}

/// One row per connection: id, state, since, transitions, last error
pub fn render_health_table(snapshot: &HealthSnapshot) -> String {
    let id_width = snapshot
        .iter()
        .map(|(id, _)| id.len())
        .chain(std::iter::once("ID".len()))
        .max()
        .unwrap_or(2);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<id_width$}  {:<12}  {:<8}  {:>5}  LAST ERROR",
        "ID", "STATE", "SINCE", "TRANS"
    );
    for (id, entry) in snapshot.iter() {
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<12}  {:<8}  {:>5}  {}",
            id,
            entry.state.as_str(),
            entry.since.format("%H:%M:%S"),
            entry.transitions,
            entry.last_error.as_deref().unwrap_or("-")
        );
    }
    out
}
