//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the bridge: the domain
//! event model, connection states, configuration structures and the sink /
//! encoder traits. Business crates depend on this crate only, never on each
//! other's internals.
//!
//! ## Time Model
//! - `DomainEvent::timestamp` is the UTC wall-clock capture time
//! - `DomainEvent::seq` is a monotonic counter used for ordering/diagnostics

mod backoff;
mod blueprint;
mod connection;
mod error;
mod event;
mod sink;

pub use backoff::Backoff;
pub use blueprint::*;
pub use connection::*;
pub use error::*;
pub use event::*;
pub use sink::*;
