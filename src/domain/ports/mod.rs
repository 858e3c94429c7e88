//! Port interfaces (hexagonal architecture)
//!
//! Traits through which the services reach the durable store and external
//! plugins. Infrastructure adapters implement these; the domain and service
//! layers depend only on the traits.

pub mod agent_repository;
pub mod assignment_repository;
pub mod escalation_repository;
pub mod evidence_resolver;
pub mod ledger_repository;
pub mod progress_repository;
pub mod task_repository;
pub mod weight_advisor;

pub use agent_repository::AgentRepository;
pub use assignment_repository::AssignmentRepository;
pub use escalation_repository::EscalationRepository;
pub use evidence_resolver::{AcceptAllResolver, EvidenceResolver};
pub use ledger_repository::LedgerRepository;
pub use progress_repository::ProgressRepository;
pub use task_repository::{TaskRepository, WithdrawOutcome};
pub use weight_advisor::{SchedulingHistory, WeightAdvisor};
