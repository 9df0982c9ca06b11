//! Fleet-level coordination: the device registry, aggregate statistics,
//! and the orchestrator that drives discovery and the control tick.

pub mod orchestrator;
pub mod registry;
pub mod stats;

pub use orchestrator::FleetOrchestrator;
pub use registry::{FleetRegistry, Transition};
pub use stats::FleetStats;
