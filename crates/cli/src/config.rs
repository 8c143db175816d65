//! Configuration loading with command-line / environment overrides.

use std::path::Path;

use config_loader::ConfigLoader;
use contracts::{BridgeConfig, SourceConfig, Transport};
use tracing::info;

use crate::error::{CliError, Result};

/// Source endpoint values that take precedence over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<Transport>,
}

impl SourceOverrides {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none() && self.transport.is_none()
    }

    pub fn apply(&self, source: &mut SourceConfig) {
        if let Some(host) = &self.host {
            info!(host = %host, "Overriding source host");
            source.host = host.clone();
        }
        if let Some(port) = self.port {
            info!(port, "Overriding source port");
            source.port = port;
        }
        if let Some(transport) = self.transport {
            info!(transport = %transport, "Overriding source transport");
            source.transport = transport;
        }
    }
}

/// Load, validate and apply overrides
pub fn load_config(path: &Path, overrides: &SourceOverrides) -> Result<BridgeConfig> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    let mut config = ConfigLoader::load_from_path(path)?;
    overrides.apply(&mut config.source);
    Ok(config)
}

/// Source settings as handed to the connector
///
/// The global backoff applies unless the source carries its own.
pub fn resolve_source(config: &BridgeConfig) -> SourceConfig {
    let mut source = config.source.clone();
    source.backoff.get_or_insert(config.backoff);
    source
}
