//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{BridgeConfig, ContractError};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<BridgeConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<BridgeConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<BridgeConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Encoding, EventKind, Framing, Transport};

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
channel_capacity = 512

[source]
transport = "udp"
host = "0.0.0.0"
port = 2242
framing = "length_prefixed"
grid_length = 4

[station]
callsign = "W1AW"
grid = "FN31pr"

[backoff]
initial_ms = 250
max_ms = 8000

[[sinks]]
id = "logger"
host = "127.0.0.1"
port = 52001
encoding = "adif"

[[sinks]]
id = "ticker"
transport = "udp"
host = "127.0.0.1"
port = 52002
encoding = "line"
kinds = ["station_heard"]
params = { template = "{call} {snr}" }
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.channel_capacity, 512);
        assert_eq!(config.source.transport, Transport::Udp);
        assert_eq!(config.source.port, 2242);
        assert_eq!(config.source.framing, Framing::LengthPrefixed);
        assert_eq!(config.source.grid_length, 4);
        assert_eq!(config.station.callsign.as_deref(), Some("W1AW"));
        assert_eq!(config.backoff.initial_ms, 250);
        // 未填写的字段取默认值
        assert_eq!(config.backoff.multiplier, 2.0);
        assert_eq!(config.sinks.len(), 2);
        assert_eq!(config.sinks[0].transport, Transport::Tcp);
        assert_eq!(config.sinks[1].encoding, Encoding::Line);
        assert_eq!(config.sinks[1].kinds, vec![EventKind::StationHeard]);
        assert_eq!(
            config.sinks[1].params.get("template").map(String::as_str),
            Some("{call} {snr}")
        );
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "source": { "host": "radio.local" },
            "sinks": [{
                "id": "gridtracker",
                "transport": "udp",
                "host": "127.0.0.1",
                "port": 2237,
                "encoding": "json"
            }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.source.host, "radio.local");
        assert_eq!(config.source.port, 2171);
        assert_eq!(config.sinks[0].id, "gridtracker");
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_parse_unknown_encoding() {
        let content = r#"
[[sinks]]
id = "x"
host = "127.0.0.1"
port = 1
encoding = "cabrillo"
"#;
        let err = parse(content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
