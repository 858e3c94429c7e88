//! SQLite persistence adapters.
//!
//! One repository per durable collection, all sharing a WAL-mode
//! connection pool. Timestamps are stored as RFC 3339 text; status enums
//! as their snake_case string form; list-valued fields as JSON.

pub mod agent_repo;
pub mod assignment_repo;
pub mod connection;
pub mod escalation_repo;
pub mod ledger_repo;
pub mod progress_repo;
pub mod task_repo;
pub mod utils;

pub use agent_repo::AgentRepositoryImpl;
pub use assignment_repo::AssignmentRepositoryImpl;
pub use connection::DatabaseConnection;
pub use escalation_repo::EscalationRepositoryImpl;
pub use ledger_repo::LedgerRepositoryImpl;
pub use progress_repo::ProgressRepositoryImpl;
pub use task_repo::TaskRepositoryImpl;
