//! Intake queue: the serialized boundary between the outside world and the
//! cooperative loop.
//!
//! Agents and operators talk to the core through a `CoreHandle`; every
//! message crosses one mpsc channel and is handled by the single loop
//! writer, which is what makes the shared-state policy of the core hold
//! without fine-grained locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::application::hive::{CoreCancelOutcome, TaskHistory};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AgentDescriptor, AgentHealth, Escalation, PolicyKind, Task};
use crate::services::agent_registry::{AgentFilter, RegisterOutcome};
use crate::services::monitor::{CompleteOutcome, ReportOutcome};
use crate::services::task_queue::{QueueStats, SubmitOutcome};

type Reply<T> = oneshot::Sender<DomainResult<T>>;

/// Every message the loop accepts, across all boundary surfaces.
pub enum IntakeMessage {
    // Submission surface
    Submit {
        task: Task,
        reply: Reply<SubmitOutcome>,
    },

    // Agent surface
    Register {
        descriptor: AgentDescriptor,
        reply: Reply<RegisterOutcome>,
    },
    Heartbeat {
        agent_id: String,
        timestamp: DateTime<Utc>,
        health_signal: Option<AgentHealth>,
        reply: Reply<()>,
    },
    AssignmentAck {
        assignment_id: Uuid,
        reply: Reply<()>,
    },
    Progress {
        assignment_id: Uuid,
        progress_pct: u8,
        summary: String,
        evidence: Vec<String>,
        blockers: Vec<String>,
        confidence: u8,
        reply: Reply<ReportOutcome>,
    },
    Complete {
        assignment_id: Uuid,
        evidence: Vec<String>,
        reply: Reply<CompleteOutcome>,
    },
    Fail {
        assignment_id: Uuid,
        reason: String,
        reply: Reply<()>,
    },

    // Operator surface
    Cancel {
        task_id: Uuid,
        reason: String,
        reply: Reply<CoreCancelOutcome>,
    },
    ForceComplete {
        task_id: Uuid,
        reply: Reply<Task>,
    },
    DrainAgent {
        agent_id: String,
        reply: Reply<()>,
    },
    AdjustWeights {
        weights: HashMap<String, f64>,
        reply: Reply<()>,
    },
    SetPolicy {
        kind: PolicyKind,
        reply: Reply<()>,
    },
    ResolveEscalation {
        escalation_id: Uuid,
        reply: Reply<()>,
    },
    QueueStats {
        reply: Reply<QueueStats>,
    },
    ListAgents {
        filter: AgentFilter,
        reply: Reply<Vec<AgentDescriptor>>,
    },
    ListEscalations {
        unresolved_only: bool,
        reply: Reply<Vec<Escalation>>,
    },
    TaskHistory {
        task_id: Uuid,
        reply: Reply<TaskHistory>,
    },
}

/// Cloneable handle used by agents, operators, and tests to reach a
/// running orchestrator.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<IntakeMessage>,
    shutdown: broadcast::Sender<()>,
}

impl CoreHandle {
    pub(crate) fn new(tx: mpsc::Sender<IntakeMessage>, shutdown: broadcast::Sender<()>) -> Self {
        Self { tx, shutdown }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> IntakeMessage,
    ) -> DomainResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| DomainError::Unavailable("orchestrator loop stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| DomainError::Unavailable("orchestrator dropped the request".to_string()))?
    }

    pub async fn submit(&self, task: Task) -> DomainResult<SubmitOutcome> {
        self.call(|reply| IntakeMessage::Submit { task, reply }).await
    }

    pub async fn register(&self, descriptor: AgentDescriptor) -> DomainResult<RegisterOutcome> {
        self.call(|reply| IntakeMessage::Register { descriptor, reply })
            .await
    }

    pub async fn heartbeat(
        &self,
        agent_id: impl Into<String>,
        health_signal: Option<AgentHealth>,
    ) -> DomainResult<()> {
        let agent_id = agent_id.into();
        self.call(|reply| IntakeMessage::Heartbeat {
            agent_id,
            timestamp: Utc::now(),
            health_signal,
            reply,
        })
        .await
    }

    pub async fn assignment_ack(&self, assignment_id: Uuid) -> DomainResult<()> {
        self.call(|reply| IntakeMessage::AssignmentAck {
            assignment_id,
            reply,
        })
        .await
    }

    pub async fn progress(
        &self,
        assignment_id: Uuid,
        progress_pct: u8,
        summary: impl Into<String>,
        evidence: Vec<String>,
        blockers: Vec<String>,
        confidence: u8,
    ) -> DomainResult<ReportOutcome> {
        let summary = summary.into();
        self.call(|reply| IntakeMessage::Progress {
            assignment_id,
            progress_pct,
            summary,
            evidence,
            blockers,
            confidence,
            reply,
        })
        .await
    }

    pub async fn complete(
        &self,
        assignment_id: Uuid,
        evidence: Vec<String>,
    ) -> DomainResult<CompleteOutcome> {
        self.call(|reply| IntakeMessage::Complete {
            assignment_id,
            evidence,
            reply,
        })
        .await
    }

    pub async fn fail(&self, assignment_id: Uuid, reason: impl Into<String>) -> DomainResult<()> {
        let reason = reason.into();
        self.call(|reply| IntakeMessage::Fail {
            assignment_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn cancel(
        &self,
        task_id: Uuid,
        reason: impl Into<String>,
    ) -> DomainResult<CoreCancelOutcome> {
        let reason = reason.into();
        self.call(|reply| IntakeMessage::Cancel {
            task_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn force_complete(&self, task_id: Uuid) -> DomainResult<Task> {
        self.call(|reply| IntakeMessage::ForceComplete { task_id, reply })
            .await
    }

    pub async fn drain_agent(&self, agent_id: impl Into<String>) -> DomainResult<()> {
        let agent_id = agent_id.into();
        self.call(|reply| IntakeMessage::DrainAgent { agent_id, reply })
            .await
    }

    pub async fn adjust_policy_weights(&self, weights: HashMap<String, f64>) -> DomainResult<()> {
        self.call(|reply| IntakeMessage::AdjustWeights { weights, reply })
            .await
    }

    pub async fn set_policy(&self, kind: PolicyKind) -> DomainResult<()> {
        self.call(|reply| IntakeMessage::SetPolicy { kind, reply }).await
    }

    pub async fn resolve_escalation(&self, escalation_id: Uuid) -> DomainResult<()> {
        self.call(|reply| IntakeMessage::ResolveEscalation {
            escalation_id,
            reply,
        })
        .await
    }

    pub async fn queue_stats(&self) -> DomainResult<QueueStats> {
        self.call(|reply| IntakeMessage::QueueStats { reply }).await
    }

    pub async fn list_agents(&self, filter: AgentFilter) -> DomainResult<Vec<AgentDescriptor>> {
        self.call(|reply| IntakeMessage::ListAgents { filter, reply })
            .await
    }

    pub async fn list_escalations(&self, unresolved_only: bool) -> DomainResult<Vec<Escalation>> {
        self.call(|reply| IntakeMessage::ListEscalations {
            unresolved_only,
            reply,
        })
        .await
    }

    pub async fn task_history(&self, task_id: Uuid) -> DomainResult<TaskHistory> {
        self.call(|reply| IntakeMessage::TaskHistory { task_id, reply })
            .await
    }

    /// Stop the loop between ticks. In-flight state persists and recovers
    /// at next boot.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
