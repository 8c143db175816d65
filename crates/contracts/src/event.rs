//! DomainEvent - EventTranslator output
//!
//! Normalized, transport-independent representation of one decoded
//! contact/status update from the source application.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event shared by reference between every sink
pub type SharedEvent = Arc<DomainEvent>;

/// Kind of domain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A station was decoded on the air
    StationHeard,
    /// A grid locator was announced
    GridUpdate,
    /// Dial/offset frequency or speed changed
    FrequencyChange,
    /// Heartbeat (station HB or source ping)
    Heartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StationHeard => "station_heard",
            Self::GridUpdate => "grid_update",
            Self::FrequencyChange => "frequency_change",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event
///
/// Produced once by the translator and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Monotonic sequence number assigned by the source connector
    pub seq: u64,

    /// Event kind
    pub kind: EventKind,

    /// Canonical (upper case) callsign, empty for non-station events
    pub callsign: String,

    /// Canonical Maidenhead locator (4 or 6 characters)
    pub grid: Option<String>,

    /// RF frequency in Hz
    pub frequency_hz: Option<u64>,

    /// Operating mode (always "JS8" for this source)
    pub mode: String,

    /// JS8 speed submode (NORMAL, FAST, TURBO, SLOW, ULTRA)
    pub submode: Option<String>,

    /// Signal report in dB
    pub snr: Option<i32>,

    /// Free text carried by the frame
    pub text: Option<String>,

    /// UTC capture time
    pub timestamp: DateTime<Utc>,

    /// Source frame bytes (raw passthrough)
    #[serde(skip)]
    pub raw: Bytes,
}

impl DomainEvent {
    /// Create an event with only the mandatory fields set
    pub fn new(seq: u64, kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            seq,
            kind,
            callsign: String::new(),
            grid: None,
            frequency_hz: None,
            mode: DEFAULT_MODE.to_string(),
            submode: None,
            snr: None,
            text: None,
            timestamp,
            raw: Bytes::new(),
        }
    }

    /// True if the event refers to a specific station
    pub fn has_station(&self) -> bool {
        !self.callsign.is_empty()
    }

    /// Frequency in MHz
    pub fn frequency_mhz(&self) -> Option<f64> {
        self.frequency_hz.map(|hz| hz as f64 / 1_000_000.0)
    }

    /// Wrap into a shareable handle
    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

/// Mode reported for every event of the JS8Call source
pub const DEFAULT_MODE: &str = "JS8";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn frequency_mhz_conversion() {
        let mut event = DomainEvent::new(
            1,
            EventKind::StationHeard,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        assert_eq!(event.frequency_mhz(), None);
        event.frequency_hz = Some(7_078_000);
        assert_eq!(event.frequency_mhz(), Some(7.078));
    }

    #[test]
    fn json_skips_raw_bytes() {
        let mut event = DomainEvent::new(
            7,
            EventKind::Heartbeat,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        event.raw = Bytes::from_static(b"{\"type\":\"PING\"}");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"heartbeat\""));
        assert!(!json.contains("raw"));
    }
}
