//! Application layer
//!
//! Wires the services together behind a single facade (`HiveCore`), exposes
//! the agent/operator surfaces as an intake-message handle, and runs the
//! cooperative orchestration loop.

pub mod hive;
pub mod intake;
pub mod orchestrator;

pub use hive::{CoreCancelOutcome, HiveCore, ReconcileSummary, TaskHistory};
pub use intake::CoreHandle;
pub use orchestrator::Orchestrator;
