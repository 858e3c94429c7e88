//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute. They form a DAG
//! through prerequisite relations and move through a strict lifecycle from
//! submission to one of four absorbing terminal states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resources::ResourceSpec;

/// A capability label. Agents advertise sets of these; a task requires
/// exactly one. Matching is set containment, never string inspection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in the orchestration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but prerequisites are not all completed
    Pending,
    /// All prerequisites completed; eligible for withdrawal by the scheduler
    Ready,
    /// Withdrawn by the scheduler; an assignment exists, agent not yet working
    Assigned,
    /// The assigned agent has reported progress
    Running,
    /// The agent declared completion; evidence validation outstanding
    AwaitingEvidence,
    /// Task completed with accepted evidence
    Completed,
    /// Task failed (agent-reported or upstream failure)
    Failed,
    /// Task deliberately abandoned by cancellation
    Abandoned,
    /// Automated recovery exhausted; a human owns this task now
    EscalatedToHuman,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::AwaitingEvidence => "awaiting_evidence",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
            Self::EscalatedToHuman => "escalated_to_human",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "assigned" => Some(Self::Assigned),
            "running" => Some(Self::Running),
            "awaiting_evidence" => Some(Self::AwaitingEvidence),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            "escalated_to_human" => Some(Self::EscalatedToHuman),
            _ => None,
        }
    }

    /// Check if this is an absorbing terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Abandoned | Self::EscalatedToHuman
        )
    }

    /// Whether a task in this status has exactly one active assignment.
    pub fn has_active_assignment(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running | Self::AwaitingEvidence)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[
                Self::Ready,
                Self::Failed,
                Self::Abandoned,
                Self::EscalatedToHuman,
            ],
            Self::Ready => &[
                Self::Assigned,
                Self::Failed,
                Self::Abandoned,
                Self::EscalatedToHuman,
            ],
            Self::Assigned => &[
                Self::Running,
                Self::Ready, // reassignment or lost dispatch
                Self::Completed,
                Self::Failed,
                Self::Abandoned,
                Self::EscalatedToHuman,
            ],
            Self::Running => &[
                Self::AwaitingEvidence,
                Self::Ready, // reassignment
                Self::Completed,
                Self::Failed,
                Self::Abandoned,
                Self::EscalatedToHuman,
            ],
            Self::AwaitingEvidence => &[
                Self::Running, // evidence rejected, agent keeps working
                Self::Ready,   // reassignment
                Self::Completed,
                Self::Failed,
                Self::Abandoned,
                Self::EscalatedToHuman,
            ],
            Self::Completed | Self::Failed | Self::Abandoned | Self::EscalatedToHuman => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome applied by the queue's `finish` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed { reason: String },
    Abandoned { reason: String },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
            Self::Abandoned { .. } => TaskStatus::Abandoned,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Completed => None,
            Self::Failed { reason } | Self::Abandoned { reason } => Some(reason),
        }
    }
}

/// A discrete unit of work dispatched to exactly one agent at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description
    pub description: String,
    /// Categorical kind, matched against agent capability sets
    pub kind: Capability,
    /// Priority; higher is more urgent, ties broken by submission time
    pub priority: i32,
    /// Current status
    pub status: TaskStatus,
    /// Task IDs that must complete before this one becomes ready
    pub prerequisites: Vec<Uuid>,
    /// Parent task (for re-assignment chains)
    pub parent_id: Option<Uuid>,
    /// Provenance pointer to the assignment this task was reassigned from
    pub prior_assignment_id: Option<Uuid>,
    /// How many times this task has been reassigned
    pub reassignment_count: u32,
    /// How many escalations have been raised against this task
    pub escalation_count: u32,
    /// Compute required to run this task
    pub resources: ResourceSpec,
    /// Execution estimate, used to derive the assignment deadline
    pub estimated_duration_secs: u32,
    /// Set when no reservation can satisfy the requirement; cleared on
    /// every ledger release
    pub blocked_on_resources: bool,
    /// Idempotency key for submission deduplication
    pub idempotency_key: Option<String>,
    /// Why the task failed or was abandoned
    pub failure_reason: Option<String>,
    /// When submitted
    pub submitted_at: DateTime<Utc>,
    /// Soft deadline; ordering hint for the queue, enforcement is the
    /// monitor's domain
    pub deadline: Option<DateTime<Utc>>,
    /// When execution first started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Version for optimistic locking
    pub version: u64,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        kind: impl Into<Capability>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            kind: kind.into(),
            priority: 0,
            status: TaskStatus::default(),
            prerequisites: Vec::new(),
            parent_id: None,
            prior_assignment_id: None,
            reassignment_count: 0,
            escalation_count: 0,
            resources: ResourceSpec::zero(),
            estimated_duration_secs: 3600,
            blocked_on_resources: false,
            idempotency_key: None,
            failure_reason: None,
            submitted_at: now,
            deadline: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
            version: 1,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a prerequisite.
    pub fn with_prerequisite(mut self, task_id: Uuid) -> Self {
        if !self.prerequisites.contains(&task_id) {
            self.prerequisites.push(task_id);
        }
        self
    }

    /// Set the full prerequisite list.
    pub fn with_prerequisites(mut self, prerequisites: Vec<Uuid>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    /// Set the soft deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the resource requirement.
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Set the execution estimate.
    pub fn with_estimate(mut self, secs: u32) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    /// Set the idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the parent task.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status, bumping version and timestamps.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), crate::domain::DomainError> {
        if !self.can_transition_to(new_status) {
            return Err(crate::domain::DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }
        self.apply_status(new_status);
        Ok(())
    }

    /// Force a status transition, bypassing the state machine.
    ///
    /// Only for crash recovery, startup reconciliation, operator
    /// force-completion, and test setup. A warning is emitted every time so
    /// bypass sites are visible in logs.
    pub fn force_status(&mut self, new_status: TaskStatus, reason: &str) {
        tracing::warn!(
            task_id = %self.id,
            from = %self.status.as_str(),
            to = %new_status.as_str(),
            reason = reason,
            "Forcing task status transition (bypassing state machine)"
        );
        self.apply_status(new_status);
    }

    fn apply_status(&mut self, new_status: TaskStatus) {
        self.status = new_status;
        self.touch();
        match new_status {
            TaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
    }

    /// Bump version and updated-at without a status change.
    ///
    /// Every mutation path must call this exactly once before persisting so
    /// the store's compare-and-set sees a fresh version.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Check if task is in an absorbing terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate submission-level constraints.
    pub fn validate(&self) -> Result<(), crate::domain::DomainError> {
        use crate::domain::DomainError;
        if self.title.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task title cannot be empty".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task description cannot be empty".to_string(),
            ));
        }
        if self.kind.as_str().trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task kind cannot be empty".to_string(),
            ));
        }
        if self.priority < 0 {
            return Err(DomainError::ValidationFailed(format!(
                "task priority must be non-negative, got {}",
                self.priority
            )));
        }
        if self.prerequisites.contains(&self.id) {
            return Err(DomainError::DependencyCycle(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("Build it", "Build the artifact", "build");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.kind, Capability::from("build"));
        assert_eq!(task.version, 1);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("t", "d", "build");
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());
        task.transition_to(TaskStatus::AwaitingEvidence).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.is_terminal());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Abandoned,
            TaskStatus::EscalatedToHuman,
        ] {
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut task = Task::new("t", "d", "build");
        // Pending → Assigned must go through Ready
        assert!(task.transition_to(TaskStatus::Assigned).is_err());
        // Pending → Completed is never direct
        assert!(task.transition_to(TaskStatus::Completed).is_err());
        task.transition_to(TaskStatus::Ready).unwrap();
        // Ready → Running must go through Assigned
        assert!(task.transition_to(TaskStatus::Running).is_err());
    }

    #[test]
    fn test_reassignment_returns_to_ready() {
        let mut task = Task::new("t", "d", "build");
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        // Monitor reassignment path
        task.transition_to(TaskStatus::Ready).unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[test]
    fn test_transition_bumps_version() {
        let mut task = Task::new("t", "d", "build");
        let v = task.version;
        task.transition_to(TaskStatus::Ready).unwrap();
        assert_eq!(task.version, v + 1);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let task = Task::new("", "d", "build");
        assert!(task.validate().is_err());

        let task = Task::new("t", "   ", "build");
        assert!(task.validate().is_err());

        let task = Task::new("t", "d", "build").with_priority(-1);
        assert!(task.validate().is_err());

        let mut task = Task::new("t", "d", "build");
        let id = task.id;
        task = task.with_prerequisite(id);
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_force_status_bypasses_machine() {
        let mut task = Task::new("t", "d", "build");
        task.force_status(TaskStatus::Completed, "test setup");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Ready,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::AwaitingEvidence,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Abandoned,
            TaskStatus::EscalatedToHuman,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
    }
}
