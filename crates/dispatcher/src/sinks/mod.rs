//! Sink transports
//!
//! Contains NetworkSink (TCP and UDP) and FileSink.

mod file;
mod network;

pub use self::file::FileSink;
pub use self::network::NetworkSink;
