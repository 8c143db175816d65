//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink definition rejected; the sink is never started
    #[error("invalid sink '{id}': {message}")]
    InvalidSink { id: String, message: String },

    /// A sink with this id is already registered
    #[error("sink '{id}' already exists")]
    DuplicateSink { id: String },

    /// No sink with this id
    #[error("unknown sink '{id}'")]
    UnknownSink { id: String },

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create an invalid sink error
    pub fn invalid_sink(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSink {
            id: id.into(),
            message: message.into(),
        }
    }
}
