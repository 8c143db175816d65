//! BridgeConfig - Config Loader output
//!
//! Describes the complete bridge configuration: source endpoint, station
//! identity, reconnect policy and the downstream sink routes.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use validator::{Validate, ValidationError};

use crate::{EventKind, Transport};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BridgeConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Source (JS8Call API) endpoint
    #[serde(default)]
    #[validate(nested)]
    pub source: SourceConfig,

    /// Operator identity written into outgoing records
    #[serde(default)]
    pub station: StationConfig,

    /// Default reconnect policy (source and sinks)
    #[serde(default)]
    #[validate(nested)]
    pub backoff: BackoffConfig,

    /// Capacity of the source -> dispatcher channel
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1, message = "channel_capacity must be > 0"))]
    pub channel_capacity: usize,

    /// Downstream routes
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            source: SourceConfig::default(),
            station: StationConfig::default(),
            backoff: BackoffConfig::default(),
            channel_capacity: default_channel_capacity(),
            sinks: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Look up a sink definition by id
    pub fn sink(&self, id: &str) -> Option<&SinkConfig> {
        self.sinks.iter().find(|sink| sink.id == id)
    }

    /// Sinks that should be started
    pub fn enabled_sinks(&self) -> impl Iterator<Item = &SinkConfig> {
        self.sinks.iter().filter(|sink| sink.enabled)
    }
}

/// Source connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Transport (TCP preferred, UDP fallback)
    #[serde(default)]
    pub transport: Transport,

    /// JS8Call host (TCP) or local bind address (UDP)
    #[serde(default = "default_host")]
    #[validate(length(min = 1, message = "source host cannot be empty"))]
    pub host: String,

    /// JS8Call API port
    #[serde(default = "default_source_port")]
    #[validate(range(min = 1, message = "source port must be > 0"))]
    pub port: u16,

    /// Frame delimiting on the byte stream
    #[serde(default)]
    pub framing: Framing,

    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_len")]
    #[validate(range(min = 64, message = "max_frame_len must be >= 64"))]
    pub max_frame_len: usize,

    /// No-data window after which the connection is considered stale
    #[serde(default = "default_idle_timeout_ms")]
    #[validate(range(min = 1, message = "idle_timeout_ms must be > 0"))]
    pub idle_timeout_ms: u64,

    /// Connect attempt timeout
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1, message = "connect_timeout_ms must be > 0"))]
    pub connect_timeout_ms: u64,

    /// Status poll period on TCP (0 = disabled)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Locator precision kept by the translator (4 or 6)
    #[serde(default = "default_grid_length")]
    pub grid_length: usize,

    /// Take the locator from INFO replies as well as GRID announcements
    #[serde(default)]
    pub grid_from_info: bool,

    /// Reconnect policy override for the source
    #[serde(default)]
    #[validate(nested)]
    pub backoff: Option<BackoffConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_source_port() -> u16 {
    2171
}

fn default_max_frame_len() -> usize {
    64 * 1024
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_grid_length() -> usize {
    6
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            host: default_host(),
            port: default_source_port(),
            framing: Framing::Newline,
            max_frame_len: default_max_frame_len(),
            idle_timeout_ms: default_idle_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            grid_length: default_grid_length(),
            grid_from_info: false,
            backoff: None,
        }
    }
}

impl SourceConfig {
    /// `host:port` of the source endpoint
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Frame delimiting on the source byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// LF-terminated text frames
    #[default]
    Newline,
    /// u32 big-endian length followed by the payload
    LengthPrefixed,
}

/// Operator identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station callsign (STATION_CALLSIGN)
    #[serde(default)]
    pub callsign: Option<String>,

    /// Operator callsign (OPERATOR)
    #[serde(default)]
    pub operator: Option<String>,

    /// Own locator (MY_GRIDSQUARE)
    #[serde(default)]
    pub grid: Option<String>,

    /// Operator name (MY_NAME)
    #[serde(default)]
    pub name: Option<String>,

    /// County (MY_CNTY)
    #[serde(default)]
    pub county: Option<String>,

    /// Contest class (CLASS)
    #[serde(default)]
    pub class: Option<String>,
}

/// Reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct BackoffConfig {
    /// First retry delay
    #[serde(default = "default_backoff_initial_ms")]
    #[validate(range(min = 1, message = "backoff.initial_ms must be > 0"))]
    pub initial_ms: u64,

    /// Delay ceiling
    #[serde(default = "default_backoff_max_ms")]
    #[validate(range(min = 1, message = "backoff.max_ms must be > 0"))]
    pub max_ms: u64,

    /// Growth factor per failed attempt
    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0, message = "backoff.multiplier must be within 1.0..=10.0"))]
    pub multiplier: f64,

    /// Uptime after which the delay resets to `initial_ms`
    #[serde(default = "default_backoff_stable_after_ms")]
    pub stable_after_ms: u64,
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_stable_after_ms() -> u64 {
    10_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            multiplier: default_backoff_multiplier(),
            stable_after_ms: default_backoff_stable_after_ms(),
        }
    }
}

/// Sink route configuration
///
/// A sink with `path` appends to that file; otherwise it dials
/// `host:port` over `transport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_sink_target"))]
pub struct SinkConfig {
    /// Unique sink id (health registry key)
    #[validate(length(min = 1, message = "sink id cannot be empty"))]
    pub id: String,

    /// Disabled sinks are listed in health but never started
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Transport
    #[serde(default)]
    pub transport: Transport,

    /// Target host
    #[serde(default)]
    pub host: String,

    /// Target port
    #[serde(default)]
    pub port: u16,

    /// Output file (file sinks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Wire representation
    pub encoding: Encoding,

    /// Outbound queue capacity
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1, message = "queue_capacity must be > 0"))]
    pub queue_capacity: usize,

    /// Connect attempt timeout
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1, message = "connect_timeout_ms must be > 0"))]
    pub connect_timeout_ms: u64,

    /// Single write timeout
    #[serde(default = "default_write_timeout_ms")]
    #[validate(range(min = 1, message = "write_timeout_ms must be > 0"))]
    pub write_timeout_ms: u64,

    /// Reconnect policy override
    #[serde(default)]
    #[validate(nested)]
    pub backoff: Option<BackoffConfig>,

    /// Accepted event kinds (empty = all)
    #[serde(default)]
    pub kinds: Vec<EventKind>,

    /// Encoding-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// `path` for file sinks, `host` and `port` for network sinks
fn validate_sink_target(sink: &SinkConfig) -> Result<(), ValidationError> {
    let invalid = |field: &'static str, message: &'static str| {
        let mut error = ValidationError::new("target").with_message(Cow::Borrowed(message));
        error.add_param(Cow::Borrowed("field"), &field);
        Err(error)
    };

    match sink.path.as_deref() {
        Some(path) if path.trim().is_empty() => invalid("path", "sink path cannot be empty"),
        Some(_) => Ok(()),
        None if sink.host.trim().is_empty() => invalid("host", "sink host cannot be empty"),
        None if sink.port == 0 => invalid("port", "sink port must be > 0"),
        None => Ok(()),
    }
}

fn default_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    100
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

impl SinkConfig {
    /// Minimal enabled sink definition with defaults for everything else
    pub fn new(
        id: impl Into<String>,
        transport: Transport,
        host: impl Into<String>,
        port: u16,
        encoding: Encoding,
    ) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            transport,
            host: host.into(),
            port,
            path: None,
            encoding,
            queue_capacity: default_queue_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            backoff: None,
            kinds: Vec::new(),
            params: HashMap::new(),
        }
    }

    /// Minimal enabled sink appending to `path`
    pub fn file(id: impl Into<String>, path: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(id, Transport::default(), "", 0, encoding)
        }
    }

    /// `host:port` of the sink endpoint
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where records go: the file path or `host:port`
    pub fn target(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => self.address(),
        }
    }

    /// `file`, `tcp` or `udp`
    pub fn link(&self) -> String {
        if self.is_file() {
            "file".to_string()
        } else {
            self.transport.to_string()
        }
    }

    pub fn is_file(&self) -> bool {
        self.path.is_some()
    }

    /// Kind filter
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Sink wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Source frame bytes, unchanged
    Raw,
    /// ADIF record per event
    Adif,
    /// One JSON document per line
    Json,
    /// Templated text line (`params.template`)
    Line,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Adif => "adif",
            Self::Json => "json",
            Self::Line => "line",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_document() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.source.port, 2171);
        assert_eq!(config.source.transport, Transport::Tcp);
        assert_eq!(config.source.framing, Framing::Newline);
        assert_eq!(config.channel_capacity, 256);
        assert!(config.sinks.is_empty());
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn sink_defaults_and_filter() {
        let config: BridgeConfig = toml::from_str(
            r#"
[[sinks]]
id = "gridtracker"
transport = "udp"
host = "127.0.0.1"
port = 2237
encoding = "json"
kinds = ["station_heard", "grid_update"]
"#,
        )
        .unwrap();
        let sink = &config.sinks[0];
        assert!(sink.enabled);
        assert_eq!(sink.queue_capacity, 100);
        assert_eq!(sink.address(), "127.0.0.1:2237");
        assert!(sink.accepts(EventKind::StationHeard));
        assert!(!sink.accepts(EventKind::FrequencyChange));
        assert_eq!(config.enabled_sinks().count(), 1);
    }

    #[test]
    fn derive_rules_reject_empty_id_and_missing_target() {
        let sink = SinkConfig::new("", Transport::Tcp, "localhost", 52001, Encoding::Adif);
        assert!(sink.validate().unwrap_err().field_errors().contains_key("id"));

        let sink = SinkConfig::new("n1mm", Transport::Tcp, "localhost", 0, Encoding::Adif);
        let errors = sink.validate().unwrap_err();
        let target = &errors.field_errors()["__all__"][0];
        assert_eq!(target.params["field"], "port");

        let errors = SinkConfig::file("adif", " ", Encoding::Adif).validate().unwrap_err();
        let target = &errors.field_errors()["__all__"][0];
        assert_eq!(target.params["field"], "path");
    }

    #[test]
    fn file_sink_needs_no_endpoint() {
        let config: BridgeConfig = toml::from_str(
            r#"
[source]
grid_from_info = true

[[sinks]]
id = "adif"
path = "logs/js8call.adi"
encoding = "adif"
"#,
        )
        .unwrap();
        assert!(config.source.grid_from_info);
        let sink = &config.sinks[0];
        assert!(sink.is_file());
        assert_eq!(sink.target(), "logs/js8call.adi");
        assert_eq!(sink.link(), "file");
        assert!(sink.validate().is_ok());
        assert!(!SourceConfig::default().grid_from_info);
    }

    #[test]
    fn backoff_multiplier_is_bounded() {
        let backoff = BackoffConfig {
            multiplier: 1e30,
            ..BackoffConfig::default()
        };
        assert!(backoff.validate().unwrap_err().field_errors().contains_key("multiplier"));

        let backoff = BackoffConfig {
            multiplier: 10.0,
            ..BackoffConfig::default()
        };
        assert!(backoff.validate().is_ok());
    }
}
