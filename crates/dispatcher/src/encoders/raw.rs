//! Raw passthrough encoder

use bytes::{BufMut, Bytes, BytesMut};
use contracts::{DomainEvent, EventEncoder};

/// Source frame bytes plus a newline
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl EventEncoder for RawEncoder {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, event: &DomainEvent) -> Option<Bytes> {
        if event.raw.is_empty() {
            return None;
        }
        let mut out = BytesMut::with_capacity(event.raw.len() + 1);
        out.extend_from_slice(&event.raw);
        out.put_u8(b'\n');
        Some(out.freeze())
    }
}
