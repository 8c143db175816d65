//! Per-sink wire encodings
//!
//! Contains AdifEncoder, RawEncoder, JsonEncoder and LineEncoder.

mod adif;
mod json;
mod line;
mod raw;

use std::sync::Arc;

use contracts::{Encoding, EventEncoder, SinkConfig, StationConfig};

use crate::error::DispatcherError;

pub use self::adif::AdifEncoder;
pub use self::json::JsonEncoder;
pub use self::line::{LineEncoder, DEFAULT_TEMPLATE};
pub use self::raw::RawEncoder;

/// Build the encoder configured for `config`
pub fn encoder_for(
    config: &SinkConfig,
    station: &StationConfig,
) -> Result<Arc<dyn EventEncoder>, DispatcherError> {
    Ok(match config.encoding {
        Encoding::Raw => Arc::new(RawEncoder),
        Encoding::Adif => Arc::new(AdifEncoder::new(station.clone())),
        Encoding::Json => Arc::new(JsonEncoder),
        Encoding::Line => Arc::new(LineEncoder::from_params(&config.id, &config.params)?),
    })
}
