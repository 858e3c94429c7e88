//! Domain errors for the hive orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestration core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Escalation not found: {0}")]
    EscalationNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Task dependency cycle detected involving task: {0}")]
    DependencyCycle(Uuid),

    #[error("Unknown prerequisite {prerequisite} for task {task}")]
    UnknownPrerequisite { task: Uuid, prerequisite: Uuid },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Queue is at capacity ({0} live tasks)")]
    QueueFull(u64),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Orchestrator unavailable: {0}")]
    Unavailable(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl DomainError {
    /// Whether this error is worth retrying with backoff.
    ///
    /// Only infrastructure-level failures are transient; logical outcomes
    /// (conflicts, validation) are surfaced to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}
