//! Sink-side traits - Dispatcher output interface
//!
//! `EventSink` abstracts one downstream transport link; `EventEncoder`
//! converts a domain event into that sink's wire bytes.

use bytes::Bytes;

use crate::{ContractError, DomainEvent};

/// Downstream transport link
///
/// All sink transports (TCP, UDP, test doubles) implement this trait.
#[trait_variant::make(EventSink: Send)]
pub trait LocalEventSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Establish the link
    ///
    /// # Errors
    /// Returns a connection error (retried with backoff by the caller)
    async fn connect(&mut self) -> Result<(), ContractError>;

    /// Write one encoded record
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, payload: &[u8]) -> Result<(), ContractError>;

    /// Release the link; must be safe to call when not connected
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Per-sink wire encoding
///
/// `None` means the event has no representation in this encoding and is
/// silently omitted for this sink only.
pub trait EventEncoder: Send + Sync {
    /// Encoding name (used for logging)
    fn name(&self) -> &'static str;

    /// Encode one event
    fn encode(&self, event: &DomainEvent) -> Option<Bytes>;
}
