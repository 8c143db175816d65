//! # Ingestion
//!
//! Source side of the bridge.
//!
//! Responsibilities:
//! - Keep one resilient connection to the JS8Call API (TCP or UDP)
//! - Split the byte stream into frames (`FrameDecoder`)
//! - Translate frames into `DomainEvent`s (`EventTranslator`)
//! - Hand events downstream via callbacks or a bounded async-channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::SourceConnector;
//! use observability::HealthRegistry;
//!
//! let registry = HealthRegistry::new();
//! let mut source = SourceConnector::new(registry.clone());
//! let rx = source.channel(config.channel_capacity);
//! source.start(config.source.clone())?;
//!
//! while let Ok(event) = rx.recv().await {
//!     // Process event
//! }
//! ```

mod connector;
mod error;
mod framing;
mod translator;

// Re-exports
pub use connector::{EventCallback, SourceConnector, SourceMetrics, SourceMetricsSnapshot};
pub use error::{FrameError, IngestionError, Result, TranslateError};
pub use framing::{encode_frame, FrameDecoder};
pub use translator::{canonical_grid, normalize_callsign, submode_name, EventTranslator};
