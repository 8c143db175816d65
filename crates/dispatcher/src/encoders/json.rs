//! JSON lines encoder

use bytes::Bytes;
use contracts::{DomainEvent, EventEncoder};
use tracing::warn;

/// The event as one JSON document per line (without raw bytes)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl EventEncoder for JsonEncoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, event: &DomainEvent) -> Option<Bytes> {
        match serde_json::to_vec(event) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(Bytes::from(line))
            }
            Err(e) => {
                warn!(seq = event.seq, error = %e, "failed to serialize event");
                None
            }
        }
    }
}
