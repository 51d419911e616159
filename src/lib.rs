//! In-memory fleet of simulated devices whose telemetry is redrawn on a fixed
//! cadence and pushed to every connected WebSocket client.
//!
//! [`fleet::FleetStore`] owns the device records. [`broadcaster::Broadcaster`]
//! ticks the store and fans each snapshot out to its attached observers.
//!
//! The binary in `main.rs` only wires these together; keeping them in a
//! library lets the modules be exercised directly from tests.

pub mod broadcaster;
pub mod config;
pub mod fleet;
pub mod messages;
pub mod server;
