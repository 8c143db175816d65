//! ADIF record encoder
//!
//! One `<EOR>`-terminated ADI record per heard station, e.g.
//! `<CALL:6>KK7JND <GRIDSQUARE:4>DN17 <FREQ:8>7.078000 <MODE:3>JS8 ... <EOR>`.

use std::fmt::Write as _;

use bytes::Bytes;
use contracts::{DomainEvent, EventEncoder, EventKind, StationConfig};

/// Event → ADIF record
#[derive(Debug, Clone, Default)]
pub struct AdifEncoder {
    station: StationConfig,
}

impl AdifEncoder {
    pub fn new(station: StationConfig) -> Self {
        Self { station }
    }

    /// Render the record; `None` when the event has no ADIF meaning
    pub fn record(&self, event: &DomainEvent) -> Option<String> {
        if event.kind == EventKind::FrequencyChange || !event.has_station() {
            return None;
        }

        let mut out = String::with_capacity(256);
        push_field(&mut out, "CALL", &event.callsign);
        if let Some(grid) = &event.grid {
            push_field(&mut out, "GRIDSQUARE", grid);
        }
        if let Some(mhz) = event.frequency_mhz() {
            push_field(&mut out, "FREQ", &format!("{mhz:.6}"));
        }
        push_field(&mut out, "MODE", &event.mode);
        if let Some(submode) = &event.submode {
            push_field(&mut out, "SUBMODE", submode);
        }
        if let Some(snr) = event.snr {
            push_field(&mut out, "RST_RCVD", &format!("{snr:+03}"));
        }
        push_field(&mut out, "QSO_DATE", &event.timestamp.format("%Y%m%d").to_string());
        push_field(&mut out, "TIME_ON", &event.timestamp.format("%H%M%S").to_string());
        if let Some(text) = &event.text {
            push_field(&mut out, "COMMENT", &single_line(text));
        }

        let station = [
            ("STATION_CALLSIGN", &self.station.callsign),
            ("OPERATOR", &self.station.operator),
            ("MY_GRIDSQUARE", &self.station.grid),
            ("MY_NAME", &self.station.name),
            ("MY_CNTY", &self.station.county),
            ("CLASS", &self.station.class),
        ];
        for (name, value) in station {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                push_field(&mut out, name, value);
            }
        }

        out.push_str("<EOR>\n");
        Some(out)
    }
}

impl EventEncoder for AdifEncoder {
    fn name(&self) -> &'static str {
        "adif"
    }

    fn encode(&self, event: &DomainEvent) -> Option<Bytes> {
        self.record(event).map(Bytes::from)
    }
}

/// `<NAME:len>value ` with the length in bytes
fn push_field(out: &mut String, name: &str, value: &str) {
    // Writing into a String cannot fail.
    let _ = write!(out, "<{}:{}>{} ", name, value.len(), value);
}

/// Records are line-oriented; fold embedded line breaks
fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    /// Minimal ADI reader for checking records
    fn parse_record(record: &str) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut rest = record;
        while let Some(start) = rest.find('<') {
            rest = &rest[start + 1..];
            let end = rest.find('>').unwrap();
            let spec = &rest[..end];
            rest = &rest[end + 1..];
            if spec.eq_ignore_ascii_case("EOR") {
                break;
            }
            let (name, len) = spec.split_once(':').unwrap();
            let len: usize = len.parse().unwrap();
            fields.insert(name.to_string(), rest[..len].to_string());
            rest = &rest[len..];
        }
        fields
    }

    fn heard() -> DomainEvent {
        let mut event = DomainEvent::new(
            1,
            EventKind::StationHeard,
            Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 5).unwrap(),
        );
        event.callsign = "KK7JND".into();
        event.grid = Some("DN17".into());
        event.frequency_hz = Some(7_078_000);
        event
    }

    #[test]
    fn test_kk7jnd_record() {
        let record = AdifEncoder::default().record(&heard()).unwrap();
        assert!(record.starts_with("<CALL:6>KK7JND <GRIDSQUARE:4>DN17 <FREQ:8>7.078000 <MODE:3>JS8 "));
        assert!(record.ends_with("<EOR>\n"));

        let fields = parse_record(&record);
        assert_eq!(fields["CALL"], "KK7JND");
        assert_eq!(fields["GRIDSQUARE"], "DN17");
        assert_eq!(fields["FREQ"], "7.078000");
        assert_eq!(fields["MODE"], "JS8");
        assert_eq!(fields["QSO_DATE"], "20240309");
        assert_eq!(fields["TIME_ON"], "183005");
    }

    #[test]
    fn test_record_round_trip_with_station() {
        let station = StationConfig {
            callsign: Some("N0CALL".into()),
            operator: Some("N0CALL".into()),
            grid: Some("EM12ab".into()),
            name: Some("Pat".into()),
            county: Some("  ".into()),
            class: Some("1D".into()),
        };
        let mut event = heard();
        event.submode = Some("FAST".into());
        event.snr = Some(-7);
        event.text = Some("KK7JND: N0CALL SNR?\nthanks".into());

        let fields = parse_record(&AdifEncoder::new(station).record(&event).unwrap());
        assert_eq!(fields["SUBMODE"], "FAST");
        assert_eq!(fields["RST_RCVD"], "-07");
        assert_eq!(fields["COMMENT"], "KK7JND: N0CALL SNR? thanks");
        assert_eq!(fields["STATION_CALLSIGN"], "N0CALL");
        assert_eq!(fields["MY_GRIDSQUARE"], "EM12ab");
        assert_eq!(fields["MY_NAME"], "Pat");
        assert_eq!(fields["CLASS"], "1D");
        assert!(!fields.contains_key("MY_CNTY"));
    }

    #[test]
    fn test_deterministic() {
        let encoder = AdifEncoder::default();
        let event = heard();
        assert_eq!(encoder.encode(&event), encoder.encode(&event));
    }

    #[test]
    fn test_skips_events_without_adif_meaning() {
        let encoder = AdifEncoder::default();

        let mut freq = heard();
        freq.kind = EventKind::FrequencyChange;
        assert!(encoder.encode(&freq).is_none());

        let mut anonymous = heard();
        anonymous.callsign.clear();
        assert!(encoder.encode(&anonymous).is_none());
    }
}
