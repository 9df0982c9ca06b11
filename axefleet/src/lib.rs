//! Fleet management core for network-attached Bitcoin miners.
//!
//! Discovers miners on the local network, polls their telemetry on a fixed
//! cadence, and runs a per-device thermal control loop constrained by a
//! time-of-use mining schedule. Alerts flow out through a deduplicating
//! notifier task.

pub mod alert;
pub mod config;
pub mod device;
pub mod error;
pub mod fleet;
pub mod rates;
pub mod store;
pub mod thermal;
pub mod tracing;
pub mod types;
