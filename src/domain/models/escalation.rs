//! Escalation domain model.
//!
//! An escalation classifies an anomaly on an assignment or task and records
//! the policy response taken. Escalations are the audit trail behind the
//! core guarantee that no task is ever silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSeverity {
    Low,
    Medium,
    High,
    Critical,
    SystemFailure,
}

impl EscalationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::SystemFailure => "system_failure",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            "system_failure" => Some(Self::SystemFailure),
            _ => None,
        }
    }
}

impl std::fmt::Display for EscalationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What triggered the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCause {
    ProgressStall,
    HeartbeatLoss,
    DeadlineOverrun,
    EvidenceInvalid,
    ReassignmentExhausted,
}

impl EscalationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProgressStall => "progress_stall",
            Self::HeartbeatLoss => "heartbeat_loss",
            Self::DeadlineOverrun => "deadline_overrun",
            Self::EvidenceInvalid => "evidence_invalid",
            Self::ReassignmentExhausted => "reassignment_exhausted",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "progress_stall" => Some(Self::ProgressStall),
            "heartbeat_loss" => Some(Self::HeartbeatLoss),
            "deadline_overrun" => Some(Self::DeadlineOverrun),
            "evidence_invalid" => Some(Self::EvidenceInvalid),
            "reassignment_exhausted" => Some(Self::ReassignmentExhausted),
            _ => None,
        }
    }
}

impl std::fmt::Display for EscalationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Automated action taken in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Reassign,
    NotifyHuman,
    Abandon,
    /// Recorded but no automated action taken
    None,
}

impl EscalationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reassign => "reassign",
            Self::NotifyHuman => "notify_human",
            Self::Abandon => "abandon",
            Self::None => "none",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reassign" => Some(Self::Reassign),
            "notify_human" => Some(Self::NotifyHuman),
            "abandon" => Some(Self::Abandon),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// A recorded anomaly and the response taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    /// Unique identifier
    pub id: Uuid,
    /// Task the anomaly belongs to
    pub task_id: Uuid,
    /// Agent involved, when one was
    pub agent_id: Option<String>,
    pub severity: EscalationSeverity,
    pub cause: EscalationCause,
    pub action: EscalationAction,
    /// Cleared by an operator once handled
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn new(
        task_id: Uuid,
        agent_id: Option<String>,
        severity: EscalationSeverity,
        cause: EscalationCause,
        action: EscalationAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            agent_id,
            severity,
            cause,
            action,
            resolved: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Mark resolved. Idempotent.
    pub fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(EscalationSeverity::Medium < EscalationSeverity::High);
        assert!(EscalationSeverity::Critical < EscalationSeverity::SystemFailure);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut e = Escalation::new(
            Uuid::new_v4(),
            None,
            EscalationSeverity::Medium,
            EscalationCause::ProgressStall,
            EscalationAction::None,
        );
        e.resolve();
        let first = e.resolved_at;
        e.resolve();
        assert_eq!(e.resolved_at, first);
    }
}
