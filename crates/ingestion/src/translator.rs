//! EventTranslator - JS8Call API frames to `DomainEvent`
//!
//! Every frame is a JSON envelope `{"type": ..., "value": ..., "params": {...}}`.
//! Unknown type tags produce no event.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::{DomainEvent, EventKind, SourceConfig};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::TranslateError;

/// Envelope as sent by the JS8Call API
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// Stateless frame translator
#[derive(Debug, Clone, Copy)]
pub struct EventTranslator {
    grid_length: usize,
    grid_from_info: bool,
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new(6)
    }
}

impl EventTranslator {
    /// `grid_length` is clamped to 4 or 6
    pub fn new(grid_length: usize) -> Self {
        let grid_length = if grid_length < 6 { 4 } else { 6 };
        Self {
            grid_length,
            grid_from_info: false,
        }
    }

    /// Also take the locator from the text of INFO replies
    pub fn with_grid_from_info(self, enabled: bool) -> Self {
        Self {
            grid_from_info: enabled,
            ..self
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.grid_length).with_grid_from_info(config.grid_from_info)
    }

    pub fn grid_length(&self) -> usize {
        self.grid_length
    }

    /// Translate one frame
    ///
    /// Returns `Ok(None)` for well-formed frames whose type carries no
    /// domain meaning.
    pub fn translate(
        &self,
        frame: &Bytes,
        seq: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<DomainEvent>, TranslateError> {
        let envelope: Envelope = serde_json::from_slice(frame)?;
        let tag = envelope
            .kind
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TranslateError::MissingType)?;

        let empty = Map::new();
        let params = envelope.params.as_ref().unwrap_or(&empty);
        let value = value_str(&envelope.value);

        let event = match tag.to_ascii_uppercase().as_str() {
            "RX.SPOT" => {
                let mut event = DomainEvent::new(seq, EventKind::StationHeard, captured_at);
                event.callsign = param_str(params, "CALL").map(normalize_callsign).unwrap_or_default();
                event.grid = self.param_grid(params);
                event.frequency_hz = param_u64(params, "FREQ");
                event.snr = param_i32(params, "SNR");
                event.submode = param_u64(params, "SPEED").and_then(submode_name);
                event
            }
            "RX.DIRECTED" => {
                let command = param_str(params, "CMD")
                    .map(|c| c.trim().to_ascii_uppercase())
                    .unwrap_or_default();
                let kind = match command.as_str() {
                    "HB" | "HEARTBEAT" => EventKind::Heartbeat,
                    "GRID" => EventKind::GridUpdate,
                    _ => EventKind::StationHeard,
                };
                let text = param_str(params, "TEXT")
                    .or(value)
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());

                // "KK7JND: @ALLCALL GRID DN17" carries the locator in the text
                let grid_in_text = kind == EventKind::GridUpdate
                    || (self.grid_from_info && command == "INFO");

                let mut event = DomainEvent::new(seq, kind, captured_at);
                event.callsign = param_str(params, "FROM").map(normalize_callsign).unwrap_or_default();
                event.grid = self.param_grid(params).or_else(|| {
                    if grid_in_text {
                        text.as_deref()
                            .and_then(|t| t.split_whitespace().rev().find_map(|w| self.canonical_grid(w)))
                    } else {
                        None
                    }
                });
                event.frequency_hz = param_u64(params, "FREQ");
                event.snr = param_i32(params, "SNR");
                event.submode = param_u64(params, "SPEED").and_then(submode_name);
                event.text = text;
                event
            }
            "STATION.GRID" => {
                let mut event = DomainEvent::new(seq, EventKind::GridUpdate, captured_at);
                event.grid = value.as_deref().and_then(|g| self.canonical_grid(g));
                event
            }
            "RIG.FREQ" | "STATION.STATUS" => {
                let mut event = DomainEvent::new(seq, EventKind::FrequencyChange, captured_at);
                event.frequency_hz = match param_u64(params, "FREQ") {
                    Some(freq) => Some(freq),
                    None => dial_frequency(params)?,
                };
                event.submode = param_u64(params, "SPEED").and_then(submode_name);
                event
            }
            "PING" => DomainEvent::new(seq, EventKind::Heartbeat, captured_at),
            _ => return Ok(None),
        };

        Ok(Some(DomainEvent {
            raw: frame.clone(),
            ..event
        }))
    }

    fn param_grid(&self, params: &Map<String, Value>) -> Option<String> {
        param_str(params, "GRID").and_then(|g| self.canonical_grid(&g))
    }

    /// Canonical Maidenhead locator truncated to the configured precision
    pub fn canonical_grid(&self, raw: &str) -> Option<String> {
        canonical_grid(raw, self.grid_length)
    }
}

/// `AB12cd` form, or `None` when `raw` is not a locator
///
/// 4, 6 and 8 character locators are accepted; the result keeps at most
/// `max_len` characters.
pub fn canonical_grid(raw: &str, max_len: usize) -> Option<String> {
    let chars: Vec<char> = raw.trim().chars().collect();
    if !matches!(chars.len(), 4 | 6 | 8) {
        return None;
    }

    let field = |c: char| matches!(c.to_ascii_uppercase(), 'A'..='R');
    let subsquare = |c: char| matches!(c.to_ascii_lowercase(), 'a'..='x');
    let digit = |c: char| c.is_ascii_digit();

    if !(field(chars[0]) && field(chars[1]) && digit(chars[2]) && digit(chars[3])) {
        return None;
    }
    if chars.len() >= 6 && !(subsquare(chars[4]) && subsquare(chars[5])) {
        return None;
    }
    if chars.len() == 8 && !(digit(chars[6]) && digit(chars[7])) {
        return None;
    }

    let mut grid = String::with_capacity(6);
    grid.push(chars[0].to_ascii_uppercase());
    grid.push(chars[1].to_ascii_uppercase());
    grid.push(chars[2]);
    grid.push(chars[3]);
    if max_len >= 6 && chars.len() >= 6 {
        grid.push(chars[4].to_ascii_lowercase());
        grid.push(chars[5].to_ascii_lowercase());
    }
    Some(grid)
}

/// Trim and upper-case
pub fn normalize_callsign(raw: String) -> String {
    raw.trim().to_ascii_uppercase()
}

/// JS8 speed code to submode name
pub fn submode_name(speed: u64) -> Option<String> {
    let name = match speed {
        0 => "NORMAL",
        1 => "FAST",
        2 => "TURBO",
        4 => "SLOW",
        8 => "ULTRA",
        _ => return None,
    };
    Some(name.to_string())
}

fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn param_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(value_str)
        .filter(|s| !s.trim().is_empty())
}

fn param_u64(params: &Map<String, Value>, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
        }
        _ => None,
    }
}

/// DIAL plus audio OFFSET
fn dial_frequency(params: &Map<String, Value>) -> Result<Option<u64>, TranslateError> {
    let Some(dial) = param_u64(params, "DIAL") else {
        return Ok(None);
    };
    let offset = param_u64(params, "OFFSET").unwrap_or(0);
    dial.checked_add(offset)
        .map(Some)
        .ok_or(TranslateError::OutOfRange { field: "DIAL+OFFSET" })
}

fn param_i32(params: &Map<String, Value>, key: &str) -> Option<i32> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}
