//! Templated text line encoder
//!
//! `params.template`, e.g. `"{time} {call} {grid} {freq_mhz} {snr}"`.
//! Missing optional fields render as an empty string.

use std::fmt::Write as _;

use bytes::Bytes;
use contracts::{DomainEvent, EventEncoder};

use crate::error::DispatcherError;

/// Template used when a line sink has no `template` parameter
pub const DEFAULT_TEMPLATE: &str = "{date} {time} {kind} {call} {grid} {freq_mhz} {snr} {text}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Kind,
    Call,
    Grid,
    FreqHz,
    FreqMhz,
    Mode,
    Submode,
    Snr,
    Date,
    Time,
    Text,
    Seq,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "kind" => Self::Kind,
            "call" => Self::Call,
            "grid" => Self::Grid,
            "freq_hz" => Self::FreqHz,
            "freq_mhz" => Self::FreqMhz,
            "mode" => Self::Mode,
            "submode" => Self::Submode,
            "snr" => Self::Snr,
            "date" => Self::Date,
            "time" => Self::Time,
            "text" => Self::Text,
            "seq" => Self::Seq,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Event → one formatted text line
#[derive(Debug, Clone)]
pub struct LineEncoder {
    segments: Vec<Segment>,
    needs_call: bool,
}

impl LineEncoder {
    /// Compile `template`
    ///
    /// # Errors
    /// Unknown placeholders and unbalanced braces are rejected.
    pub fn new(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed placeholder in template '{template}'"))?;
            let name = &after[..close];
            let field = Field::parse(name.trim())
                .ok_or_else(|| format!("unknown placeholder '{{{name}}}'"))?;
            segments.push(Segment::Field(field));
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unbalanced '}}' in template '{template}'"));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        let needs_call = segments.contains(&Segment::Field(Field::Call));
        Ok(Self {
            segments,
            needs_call,
        })
    }

    /// Build from sink parameters (`template`)
    pub fn from_params(
        sink_id: &str,
        params: &std::collections::HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let template = params
            .get("template")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TEMPLATE);
        Self::new(template).map_err(|e| DispatcherError::invalid_sink(sink_id, e))
    }

    /// Render one line (without the newline)
    pub fn render(&self, event: &DomainEvent) -> Option<String> {
        if self.needs_call && !event.has_station() {
            return None;
        }

        let mut out = String::with_capacity(128);
        for segment in &self.segments {
            // Writing into a String cannot fail.
            let _ = match segment {
                Segment::Literal(text) => out.write_str(text),
                Segment::Field(field) => write_field(&mut out, *field, event),
            };
        }
        Some(out.trim_end().to_string())
    }
}

fn write_field(out: &mut String, field: Field, event: &DomainEvent) -> std::fmt::Result {
    match field {
        Field::Kind => out.write_str(event.kind.as_str()),
        Field::Call => out.write_str(&event.callsign),
        Field::Grid => out.write_str(event.grid.as_deref().unwrap_or_default()),
        Field::FreqHz => match event.frequency_hz {
            Some(hz) => write!(out, "{hz}"),
            None => Ok(()),
        },
        Field::FreqMhz => match event.frequency_mhz() {
            Some(mhz) => write!(out, "{mhz:.6}"),
            None => Ok(()),
        },
        Field::Mode => out.write_str(&event.mode),
        Field::Submode => out.write_str(event.submode.as_deref().unwrap_or_default()),
        Field::Snr => match event.snr {
            Some(snr) => write!(out, "{snr}"),
            None => Ok(()),
        },
        Field::Date => write!(out, "{}", event.timestamp.format("%Y-%m-%d")),
        Field::Time => write!(out, "{}", event.timestamp.format("%H:%M:%S")),
        Field::Text => out.write_str(event.text.as_deref().unwrap_or_default()),
        Field::Seq => write!(out, "{}", event.seq),
    }
}

impl EventEncoder for LineEncoder {
    fn name(&self) -> &'static str {
        "line"
    }

    fn encode(&self, event: &DomainEvent) -> Option<Bytes> {
        self.render(event).map(|mut line| {
            line.push('\n');
            Bytes::from(line)
        })
    }
}
