//! fleetcrypt event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`FleetEvent`]: every message crossing the presentation boundary.

pub mod bus;

pub use bus::{EventBus, FleetEvent, JobId};
