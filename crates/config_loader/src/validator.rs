//! 配置校验模块
//!
//! 校验规则：
//! - 字段规则 (`validator` derive)：端口、超时、容量 > 0 等
//! - sink 目标：文件 sink 需要 path，网络 sink 需要 host 与 port
//! - source.grid_length 只能为 4 或 6
//! - backoff.max_ms >= backoff.initial_ms
//! - sink id 唯一
//!
//! 全局与 source 的错误使整个文件无效；单个 sink 的错误只影响该 sink，
//! 由 [`validate_sink`] 单独报告。

use std::collections::HashSet;

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{BackoffConfig, BridgeConfig, ContractError, SinkConfig};

/// 校验 BridgeConfig 的全局部分与 source
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &BridgeConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|errors| first_error("", &errors))?;
    validate_grid_length(config)?;
    validate_backoff("backoff", &config.backoff)?;
    if let Some(backoff) = &config.source.backoff {
        validate_backoff("source.backoff", backoff)?;
    }
    validate_sink_ids(config)?;
    Ok(())
}

/// 校验单个 sink
///
/// 校验失败的 sink 不会被启动，其余 sink 不受影响。
pub fn validate_sink(sink: &SinkConfig) -> Result<(), ContractError> {
    let prefix = format!("sinks[id={}]", sink.id);
    sink.validate()
        .map_err(|errors| first_error(&prefix, &errors))?;
    if let Some(backoff) = &sink.backoff {
        validate_backoff(&format!("{prefix}.backoff"), backoff)?;
    }
    Ok(())
}

/// 收集所有 sink 的校验错误
pub fn sink_issues(config: &BridgeConfig) -> Vec<(String, ContractError)> {
    config
        .sinks
        .iter()
        .filter_map(|sink| validate_sink(sink).err().map(|e| (sink.id.clone(), e)))
        .collect()
}

/// 校验定位精度
fn validate_grid_length(config: &BridgeConfig) -> Result<(), ContractError> {
    match config.source.grid_length {
        4 | 6 => Ok(()),
        other => Err(ContractError::config_validation(
            "source.grid_length",
            format!("grid_length must be 4 or 6, got {other}"),
        )),
    }
}

/// 校验退避上下限
fn validate_backoff(field: &str, backoff: &BackoffConfig) -> Result<(), ContractError> {
    if backoff.max_ms < backoff.initial_ms {
        return Err(ContractError::config_validation(
            format!("{field}.max_ms"),
            format!(
                "max_ms ({}) must be >= initial_ms ({})",
                backoff.max_ms, backoff.initial_ms
            ),
        ));
    }
    Ok(())
}

/// 校验 sink id 唯一性
fn validate_sink_ids(config: &BridgeConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for sink in &config.sinks {
        if !seen.insert(sink.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[id={}]", sink.id),
                "duplicate sink id",
            ));
        }
    }
    Ok(())
}

/// 把 derive 校验结果转换为第一个 (按字段名排序) 错误
fn first_error(prefix: &str, errors: &ValidationErrors) -> ContractError {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in fields {
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            }
        };
        let path = join(&**name);
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(error) = list.first() {
                    // 结构体级规则 (schema) 通过 `field` 参数指明字段
                    let path = match error.params.get("field").and_then(|v| v.as_str()) {
                        Some(field) if *name == "__all__" => join(field),
                        _ => path,
                    };
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed rule '{}'", error.code));
                    return ContractError::config_validation(path, message);
                }
            }
            ValidationErrorsKind::Struct(nested) => return first_error(&path, nested),
            ValidationErrorsKind::List(items) => {
                if let Some((index, nested)) = items.iter().next() {
                    return first_error(&format!("{path}[{index}]"), nested);
                }
            }
        }
    }
    ContractError::config_validation(prefix, errors.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Encoding, Transport};

    fn minimal_config() -> BridgeConfig {
        BridgeConfig {
            sinks: vec![
                SinkConfig::new("logger", Transport::Tcp, "127.0.0.1", 52001, Encoding::Adif),
                SinkConfig::new("map", Transport::Udp, "127.0.0.1", 2237, Encoding::Json),
            ],
            ..BridgeConfig::default()
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = minimal_config();
        assert!(validate(&config).is_ok());
        assert!(sink_issues(&config).is_empty());
    }

    #[test]
    fn test_duplicate_sink_id() {
        let mut config = minimal_config();
        config.sinks[1].id = "logger".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate sink id"));
    }

    #[test]
    fn test_grid_length() {
        let mut config = minimal_config();
        config.source.grid_length = 8;
        assert_eq!(field_of(validate(&config).unwrap_err()), "source.grid_length");
    }

    #[test]
    fn test_source_field_rules() {
        let mut config = minimal_config();
        config.source.port = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "source.port");

        let mut config = minimal_config();
        config.source.host.clear();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source host cannot be empty"));
    }

    #[test]
    fn test_channel_capacity() {
        let mut config = minimal_config();
        config.channel_capacity = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "channel_capacity");
    }

    #[test]
    fn test_backoff_ordering() {
        let mut config = minimal_config();
        config.backoff.initial_ms = 5_000;
        config.backoff.max_ms = 1_000;
        assert_eq!(field_of(validate(&config).unwrap_err()), "backoff.max_ms");

        let mut config = minimal_config();
        config.source.backoff = Some(BackoffConfig {
            initial_ms: 10,
            max_ms: 5,
            ..BackoffConfig::default()
        });
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "source.backoff.max_ms"
        );
    }

    #[test]
    fn test_invalid_sink_does_not_reject_file() {
        let mut config = minimal_config();
        config.sinks[1].port = 0;
        assert!(validate(&config).is_ok());

        let mut issues = sink_issues(&config);
        assert_eq!(issues.len(), 1);
        let (id, err) = issues.remove(0);
        assert_eq!(id, "map");
        assert_eq!(field_of(err), "sinks[id=map].port");
    }

    #[test]
    fn test_sink_target_rules() {
        let mut config = minimal_config();
        config.sinks[0].host.clear();
        let mut issues = sink_issues(&config);
        assert_eq!(issues.len(), 1);
        let (id, err) = issues.remove(0);
        assert_eq!(id, "logger");
        assert_eq!(field_of(err), "sinks[id=logger].host");

        let file = SinkConfig::file("adif", "", Encoding::Adif);
        assert_eq!(
            field_of(validate_sink(&file).unwrap_err()),
            "sinks[id=adif].path"
        );
        assert!(validate_sink(&SinkConfig::file("adif", "js8call.adi", Encoding::Adif)).is_ok());
    }

    #[test]
    fn test_backoff_multiplier_bound() {
        let mut config = minimal_config();
        config.backoff.multiplier = 1e30;
        assert_eq!(field_of(validate(&config).unwrap_err()), "backoff.multiplier");
    }

    #[test]
    fn test_sink_backoff_override() {
        let mut sink = SinkConfig::new("n1mm", Transport::Tcp, "localhost", 52001, Encoding::Adif);
        sink.backoff = Some(BackoffConfig {
            initial_ms: 100,
            max_ms: 50,
            ..BackoffConfig::default()
        });
        assert_eq!(
            field_of(validate_sink(&sink).unwrap_err()),
            "sinks[id=n1mm].backoff.max_ms"
        );
    }
}
