//! Per-device thermal management.
//!
//! Each managed miner gets a [`controller::ThermalController`] holding a
//! static safety envelope ([`profile::ThermalProfile`]) and mutable
//! control state ([`state::ThermalState`]). The orchestrator feeds it one
//! telemetry sample per tick and applies the resulting fan and frequency
//! decision to the device.

pub mod controller;
pub mod profile;
pub mod state;

pub use controller::{ControlState, FrequencyAction, ThermalController, ThermalDecision};
pub use profile::ThermalProfile;
pub use state::ThermalState;
