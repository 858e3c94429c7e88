//! Assignment domain model.
//!
//! An assignment binds one task to one agent for one attempt. A task may
//! accumulate many historical assignments but never more than one active.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// Status of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// In flight; the agent owns the task's execution state
    Active,
    /// Concluded with an agent-reported outcome
    Complete,
    /// Terminated by the monitor after a timeout
    TimedOut,
    /// Terminated by the monitor; the task returned to the queue
    Reassigned,
    /// Cut short without an attempt outcome (lost dispatch, forced
    /// cancellation)
    Superseded,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Complete => "complete",
            Self::TimedOut => "timed_out",
            Self::Reassigned => "reassigned",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "complete" => Some(Self::Complete),
            "timed_out" => Some(Self::TimedOut),
            "reassigned" => Some(Self::Reassigned),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The binding of one task to one agent for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique identifier
    pub id: Uuid,
    /// Task being attempted
    pub task_id: Uuid,
    /// Agent executing the attempt
    pub agent_id: String,
    /// Resource reservation backing this attempt
    pub allocation_id: Uuid,
    /// When dispatched
    pub assigned_at: DateTime<Utc>,
    /// Latest acceptable completion time
    pub expected_deadline: DateTime<Utc>,
    /// When the agent acknowledged the dispatch
    pub acked_at: Option<DateTime<Utc>>,
    /// Last heartbeat from the executing agent
    pub last_heartbeat_at: DateTime<Utc>,
    /// Last accepted progress report
    pub last_progress_at: DateTime<Utc>,
    /// Progress percentage; monotonically non-decreasing across valid
    /// reports
    pub progress_pct: u8,
    /// Latest reported confidence, 1-100
    pub confidence: u8,
    /// Attempt status
    pub status: AssignmentStatus,
    /// Consecutive monitor ticks spent stalled
    pub stall_count: u32,
    /// Consecutive invalid progress reports
    pub invalid_report_streak: u32,
    /// Whether a deadline-overrun escalation has been raised for this
    /// attempt
    pub deadline_escalated: bool,
    /// Set when cooperative cancellation was requested
    pub cancel_requested_at: Option<DateTime<Utc>>,
    /// When the attempt concluded
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// Create an active assignment for a task.
    ///
    /// The expected deadline is the execution estimate stretched by the
    /// configured completion-timeout multiplier.
    pub fn new(
        task: &Task,
        agent_id: impl Into<String>,
        allocation_id: Uuid,
        completion_timeout_multiplier: f64,
    ) -> Self {
        let now = Utc::now();
        let budget_secs =
            (f64::from(task.estimated_duration_secs) * completion_timeout_multiplier).ceil() as i64;
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            agent_id: agent_id.into(),
            allocation_id,
            assigned_at: now,
            expected_deadline: now + Duration::seconds(budget_secs.max(1)),
            acked_at: None,
            last_heartbeat_at: now,
            last_progress_at: now,
            progress_pct: 0,
            confidence: 0,
            status: AssignmentStatus::Active,
            stall_count: 0,
            invalid_report_streak: 0,
            deadline_escalated: false,
            cancel_requested_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Record an accepted progress report.
    pub fn record_valid_report(&mut self, pct: u8, confidence: u8, now: DateTime<Utc>) {
        self.progress_pct = pct;
        self.confidence = confidence;
        self.last_progress_at = now;
        self.last_heartbeat_at = now;
        self.stall_count = 0;
        self.invalid_report_streak = 0;
    }

    /// Record a heartbeat.
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
    }

    /// Conclude the attempt.
    pub fn conclude(&mut self, status: AssignmentStatus) {
        debug_assert!(!status.is_active());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Task;

    #[test]
    fn test_expected_deadline_uses_multiplier() {
        let task = Task::new("t", "d", "build").with_estimate(100);
        let a = Assignment::new(&task, "agent-a", Uuid::new_v4(), 1.5);
        let budget = a.expected_deadline - a.assigned_at;
        assert_eq!(budget.num_seconds(), 150);
    }

    #[test]
    fn test_record_valid_report_resets_counters() {
        let task = Task::new("t", "d", "build");
        let mut a = Assignment::new(&task, "agent-a", Uuid::new_v4(), 1.0);
        a.stall_count = 2;
        a.invalid_report_streak = 1;
        let now = Utc::now();
        a.record_valid_report(40, 80, now);
        assert_eq!(a.progress_pct, 40);
        assert_eq!(a.stall_count, 0);
        assert_eq!(a.invalid_report_streak, 0);
        assert_eq!(a.last_progress_at, now);
    }

    #[test]
    fn test_conclude_sets_completed_at() {
        let task = Task::new("t", "d", "build");
        let mut a = Assignment::new(&task, "agent-a", Uuid::new_v4(), 1.0);
        a.conclude(AssignmentStatus::Reassigned);
        assert!(!a.is_active());
        assert!(a.completed_at.is_some());
    }
}
