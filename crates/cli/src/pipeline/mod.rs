//! Bridge orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{Bridge, BridgeOptions};
pub use stats::{render_health_table, BridgeStats};
