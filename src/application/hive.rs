//! The orchestration core facade.
//!
//! `HiveCore` owns the four subsystems and exposes every boundary surface
//! as plain async methods. The cooperative loop (`Orchestrator`) and the
//! CLI both drive the same facade; tests drive it directly with manual
//! ticks and synthetic clocks.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{
    AgentDescriptor, AgentHealth, Assignment, AssignmentStatus, Config, Escalation,
    PolicyKind, ProgressReport, Task, TaskStatus,
};
use crate::domain::ports::{
    AssignmentRepository, EscalationRepository, EvidenceResolver, ProgressRepository,
    SchedulingHistory, TaskRepository, WeightAdvisor,
};
use crate::domain::ports::evidence_resolver::AcceptAllResolver;
use crate::infrastructure::database::{
    AgentRepositoryImpl, AssignmentRepositoryImpl, EscalationRepositoryImpl, LedgerRepositoryImpl,
    ProgressRepositoryImpl, TaskRepositoryImpl,
};
use crate::services::agent_registry::{AgentFilter, AgentRegistry, RegisterOutcome};
use crate::services::event_bus::{EventBus, HiveEvent};
use crate::services::monitor::{
    AccountabilityMonitor, CompleteOutcome, MonitorSummary, ReportOutcome,
};
use crate::services::resource_manager::{OptimizationHint, ResourceManager, ResourceSnapshot};
use crate::services::scheduler::{Scheduler, TickSummary};
use crate::services::task_queue::{CancelOutcome, QueueStats, SubmitOutcome, TaskQueue};

/// Outcome of a cancellation seen from the operator surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCancelOutcome {
    /// Pending/ready task abandoned immediately
    Abandoned,
    /// Already terminal; reports the state reached
    AlreadyTerminal(TaskStatus),
    /// In flight; cooperative cancellation is under way
    CancellationRequested,
}

/// What boot reconciliation found and repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub ledger_entries: usize,
    pub orphaned_tasks: usize,
    pub stale_assignments: usize,
    pub promoted_pending: usize,
}

/// Full audit trail of one task for the operator surface.
#[derive(Debug, Clone)]
pub struct TaskHistory {
    pub task: Task,
    pub assignments: Vec<Assignment>,
    pub reports: Vec<ProgressReport>,
    pub escalations: Vec<Escalation>,
}

/// The assembled orchestration core.
pub struct HiveCore {
    config: Config,
    events: Arc<EventBus>,
    queue: Arc<TaskQueue>,
    registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<AccountabilityMonitor>,
    tasks: Arc<dyn TaskRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    escalations: Arc<dyn EscalationRepository>,
}

impl HiveCore {
    /// Assemble the core over a migrated database pool with the default
    /// evidence resolver and no weight advisor.
    pub fn build(config: Config, pool: SqlitePool) -> Self {
        Self::build_with_plugins(config, pool, Arc::new(AcceptAllResolver), None)
    }

    /// Assemble the core with explicit plugins.
    pub fn build_with_plugins(
        config: Config,
        pool: SqlitePool,
        resolver: Arc<dyn EvidenceResolver>,
        advisor: Option<Arc<dyn WeightAdvisor>>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let tasks: Arc<dyn TaskRepository> = Arc::new(TaskRepositoryImpl::new(pool.clone()));
        let assignments: Arc<dyn AssignmentRepository> =
            Arc::new(AssignmentRepositoryImpl::new(pool.clone()));
        let agents = Arc::new(AgentRepositoryImpl::new(pool.clone()));
        let progress: Arc<dyn ProgressRepository> =
            Arc::new(ProgressRepositoryImpl::new(pool.clone()));
        let escalations: Arc<dyn EscalationRepository> =
            Arc::new(EscalationRepositoryImpl::new(pool.clone()));
        let ledger = Arc::new(LedgerRepositoryImpl::new(pool));

        let queue = Arc::new(TaskQueue::new(
            Arc::clone(&tasks),
            Arc::clone(&events),
            config.core.queue_soft_cap,
            config.core.scheduling_horizon(),
            config.core.upstream_failure_cascade,
        ));
        let registry = Arc::new(AgentRegistry::new(
            agents,
            Arc::clone(&assignments),
            Arc::clone(&events),
            &config.core,
        ));
        let resources = Arc::new(ResourceManager::new(
            config.core.resource_limits,
            ledger,
            Arc::clone(&events),
        ));
        let history = Arc::new(Mutex::new(SchedulingHistory::default()));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&resources),
            Arc::clone(&assignments),
            Arc::clone(&events),
            config.core.scheduling_policy,
            advisor,
            Arc::clone(&history),
            config.core.completion_timeout_multiplier,
            config.core.ack_timeout(),
        ));
        let monitor = Arc::new(AccountabilityMonitor::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&resources),
            Arc::clone(&assignments),
            Arc::clone(&progress),
            Arc::clone(&escalations),
            resolver,
            Arc::clone(&events),
            history,
            config.core.clone(),
        ));

        Self {
            config,
            events,
            queue,
            registry,
            resources,
            scheduler,
            monitor,
            tasks,
            assignments,
            progress,
            escalations,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to the append-only event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HiveEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Boot
    // ------------------------------------------------------------------

    /// Rebuild in-memory state from the store and repair what a crash left
    /// behind. Runs before the loops accept any submission.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        summary.ledger_entries = self
            .resources
            .rebuild_from_ledger()
            .await
            .context("Failed to rebuild resource counters")?;

        // Close active assignments whose task already reached a terminal
        // state, and rebuild each agent's load from what remains.
        for mut assignment in self.assignments.list_active().await? {
            let task = self.tasks.get(assignment.task_id).await?;
            if task.as_ref().is_none_or(Task::is_terminal) {
                assignment.conclude(AssignmentStatus::Superseded);
                self.assignments.update(&assignment).await?;
                self.resources.release(assignment.allocation_id).await?;
                summary.stale_assignments += 1;
            }
        }
        for agent in self.registry.list(&AgentFilter::default()).await? {
            let live = (self.assignments.list_active_by_agent(&agent.id).await?.len() as u32)
                .min(agent.capacity);
            if live != agent.current_load {
                warn!(
                    agent_id = %agent.id,
                    recorded = agent.current_load,
                    actual = live,
                    "Repairing agent load counter"
                );
                let delta = i64::from(live) - i64::from(agent.current_load);
                self.registry.adjust_load(&agent.id, delta).await?;
            }
        }

        // Tasks that claim an active attempt but have none return to the
        // queue.
        for status in [
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::AwaitingEvidence,
        ] {
            for mut task in self.tasks.list_by_status(status).await? {
                if self
                    .assignments
                    .get_active_for_task(task.id)
                    .await?
                    .is_none()
                {
                    task.force_status(TaskStatus::Ready, "no active assignment after restart");
                    self.tasks.update(&task).await?;
                    summary.orphaned_tasks += 1;
                }
            }
        }

        // Pending tasks whose prerequisites completed while we were down.
        for mut task in self.tasks.list_by_status(TaskStatus::Pending).await? {
            let mut all_done = true;
            for prereq in &task.prerequisites {
                let done = self
                    .tasks
                    .get(*prereq)
                    .await?
                    .is_some_and(|t| t.status == TaskStatus::Completed);
                if !done {
                    all_done = false;
                    break;
                }
            }
            if all_done && !task.prerequisites.is_empty() {
                task.transition_to(TaskStatus::Ready)?;
                self.tasks.update(&task).await?;
                summary.promoted_pending += 1;
            }
        }

        info!(?summary, "Boot reconciliation complete");
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Ticks (driven by the orchestrator loop, or manually in tests)
    // ------------------------------------------------------------------

    pub async fn tick_scheduler(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        self.scheduler.tick(now).await
    }

    pub async fn tick_monitor(&self, now: DateTime<Utc>) -> Result<MonitorSummary> {
        let summary = self.monitor.tick(now).await?;
        self.queue.flag_overdue(now).await?;
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Submission surface
    // ------------------------------------------------------------------

    pub async fn submit(&self, task: Task) -> DomainResult<SubmitOutcome> {
        self.queue.submit(task).await
    }

    // ------------------------------------------------------------------
    // Agent surface
    // ------------------------------------------------------------------

    pub async fn register(&self, descriptor: AgentDescriptor) -> DomainResult<RegisterOutcome> {
        self.registry.register(descriptor).await
    }

    pub async fn heartbeat(
        &self,
        agent_id: &str,
        timestamp: DateTime<Utc>,
        health_signal: Option<AgentHealth>,
    ) -> DomainResult<()> {
        self.registry
            .heartbeat(agent_id, timestamp, health_signal)
            .await?;
        self.monitor.note_heartbeat(agent_id, timestamp).await
    }

    pub async fn assignment_ack(&self, assignment_id: Uuid) -> DomainResult<()> {
        self.monitor.handle_ack(assignment_id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn progress(
        &self,
        assignment_id: Uuid,
        progress_pct: u8,
        summary: &str,
        evidence: Vec<String>,
        blockers: Vec<String>,
        confidence: u8,
    ) -> DomainResult<ReportOutcome> {
        self.monitor
            .submit_report(assignment_id, progress_pct, summary, evidence, blockers, confidence)
            .await
    }

    pub async fn complete(
        &self,
        assignment_id: Uuid,
        evidence: Vec<String>,
    ) -> DomainResult<CompleteOutcome> {
        self.monitor.handle_complete(assignment_id, evidence).await
    }

    pub async fn fail(&self, assignment_id: Uuid, reason: &str) -> DomainResult<()> {
        self.monitor.handle_fail(assignment_id, reason).await
    }

    // ------------------------------------------------------------------
    // Operator surface
    // ------------------------------------------------------------------

    /// Cancel a task. Immediate for pending/ready, cooperative for
    /// in-flight, idempotent for terminal.
    pub async fn cancel(&self, task_id: Uuid, reason: &str) -> DomainResult<CoreCancelOutcome> {
        match self.queue.cancel(task_id, reason).await? {
            CancelOutcome::Abandoned => Ok(CoreCancelOutcome::Abandoned),
            CancelOutcome::AlreadyTerminal(status) => {
                Ok(CoreCancelOutcome::AlreadyTerminal(status))
            }
            CancelOutcome::RequiresMonitor => {
                self.monitor.request_cancel(task_id, reason).await?;
                Ok(CoreCancelOutcome::CancellationRequested)
            }
        }
    }

    pub async fn force_complete(&self, task_id: Uuid) -> DomainResult<Task> {
        self.monitor.force_complete(task_id).await
    }

    pub async fn drain_agent(&self, agent_id: &str) -> DomainResult<()> {
        self.registry.drain(agent_id).await
    }

    pub async fn deregister_agent(&self, agent_id: &str) -> DomainResult<()> {
        self.registry.deregister(agent_id).await
    }

    /// Persist operator-assigned scheduling weights. Idempotent.
    pub async fn adjust_policy_weights(
        &self,
        weights: HashMap<String, f64>,
    ) -> DomainResult<()> {
        self.registry.set_weights(&weights).await
    }

    /// Swap the scheduling policy at runtime.
    pub async fn set_policy(&self, kind: PolicyKind) {
        self.scheduler.set_policy(kind).await;
    }

    pub async fn resolve_escalation(&self, escalation_id: Uuid) -> DomainResult<()> {
        let mut escalation = self
            .escalations
            .get(escalation_id)
            .await?
            .ok_or(DomainError::EscalationNotFound(escalation_id))?;
        escalation.resolve();
        self.escalations.update(&escalation).await
    }

    // ------------------------------------------------------------------
    // Read-only queries
    // ------------------------------------------------------------------

    pub async fn queue_stats(&self) -> DomainResult<QueueStats> {
        self.queue.stats().await
    }

    pub async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        self.tasks.get(task_id).await
    }

    pub async fn list_agents(&self, filter: &AgentFilter) -> DomainResult<Vec<AgentDescriptor>> {
        self.registry.list(filter).await
    }

    pub async fn list_escalations(&self, unresolved_only: bool) -> DomainResult<Vec<Escalation>> {
        if unresolved_only {
            self.escalations.list_unresolved().await
        } else {
            self.escalations.list_all().await
        }
    }

    pub async fn resource_snapshot(&self) -> ResourceSnapshot {
        self.resources.snapshot().await
    }

    pub async fn optimization_hint(&self) -> OptimizationHint {
        self.resources.optimization_hint().await
    }

    /// Full audit trail of one task.
    pub async fn task_history(&self, task_id: Uuid) -> DomainResult<TaskHistory> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let assignments = self.assignments.list_by_task(task_id).await?;
        let report_lists = futures::future::try_join_all(
            assignments
                .iter()
                .map(|a| self.progress.list_by_assignment(a.id)),
        )
        .await?;
        let escalations = self.escalations.list_by_task(task_id).await?;
        Ok(TaskHistory {
            task,
            assignments,
            reports: report_lists.into_iter().flatten().collect(),
            escalations,
        })
    }
}
