//! Error types for CLI operations.

use contracts::ContractError;
use ingestion::IngestionError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse / validation error
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ContractError),

    /// Source connector could not be (re)started
    #[error("Source connector error: {0}")]
    Source(#[from] IngestionError),

    /// Signal handler installation failed
    #[error("Failed to install {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn signal(signal: &'static str, source: std::io::Error) -> Self {
        Self::Signal { signal, source }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
