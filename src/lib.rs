//! Hive Core - Multi-Agent Orchestration Core
//!
//! The coordination heart of an autonomous software-engineering assistant
//! hive:
//! - Durable task queue with priority and dependency ordering
//! - Load-balanced scheduler matching tasks to capability-advertising agents
//! - Resource manager enforcing system-wide compute budgets
//! - Accountability monitor validating progress evidence and escalating
//!   silent failures
//! - SQLite system of record with WAL mode
//!
//! Every accepted task either completes with validated evidence, is
//! deliberately abandoned by policy, or is handed to a human with a full
//! audit trail.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use application::{CoreHandle, HiveCore, Orchestrator};
pub use domain::error::{DomainError, DomainResult};
pub use infrastructure::database::DatabaseConnection;
