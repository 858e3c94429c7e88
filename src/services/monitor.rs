//! Accountability monitor: no assignment silently stalls.
//!
//! Each tick inspects every active assignment for heartbeat loss, progress
//! stalls, and deadline overruns, escalating and reassigning per policy.
//! Incoming progress reports are validated here: monotone percentage,
//! resolvable evidence, sane confidence. Completion is accepted only with
//! evidence (or by operator force).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{
    Assignment, AssignmentStatus, CoreConfig, Escalation, EscalationAction, EscalationCause,
    EscalationSeverity, ProgressReport, Task, TaskOutcome, TaskStatus,
};
use crate::domain::ports::{
    AssignmentRepository, EscalationRepository, EvidenceResolver, ProgressRepository,
    SchedulingHistory,
};
use crate::services::agent_registry::AgentRegistry;
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::resource_manager::ResourceManager;
use crate::services::task_queue::TaskQueue;

/// Consecutive invalid reports that trigger an evidence-invalid escalation.
const INVALID_REPORT_ESCALATION_THRESHOLD: u32 = 3;
/// Consecutive stalled ticks that trigger reassignment.
const STALL_REASSIGN_THRESHOLD: u32 = 3;

/// Outcome of a progress report submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Stored and the assignment's view of progress advanced
    Accepted { progress_pct: u8 },
    /// Stored flagged invalid; progress unchanged
    Invalid { reason: String },
    /// The report completed the task (100 % with evidence)
    CompletionAccepted,
    /// A pending cancellation was finalized instead
    Canceled,
}

/// Outcome of an explicit completion message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    /// Final evidence failed to resolve; the agent keeps working
    EvidenceRejected { reason: String },
    /// A pending cancellation was finalized instead
    Canceled,
}

/// What one monitor tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub heartbeat_losses: usize,
    pub stalls: usize,
    pub deadline_overruns: usize,
    pub reassigned: usize,
    pub escalated_to_human: usize,
    pub cancellations_forced: usize,
}

/// The accountability half of the cooperative loop.
pub struct AccountabilityMonitor {
    queue: Arc<TaskQueue>,
    registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
    assignments: Arc<dyn AssignmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    escalations: Arc<dyn EscalationRepository>,
    resolver: Arc<dyn EvidenceResolver>,
    events: Arc<EventBus>,
    history: Arc<Mutex<SchedulingHistory>>,
    config: CoreConfig,
}

impl AccountabilityMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<AgentRegistry>,
        resources: Arc<ResourceManager>,
        assignments: Arc<dyn AssignmentRepository>,
        progress: Arc<dyn ProgressRepository>,
        escalations: Arc<dyn EscalationRepository>,
        resolver: Arc<dyn EvidenceResolver>,
        events: Arc<EventBus>,
        history: Arc<Mutex<SchedulingHistory>>,
        config: CoreConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            resources,
            assignments,
            progress,
            escalations,
            resolver,
            events,
            history,
            config,
        }
    }

    /// Run one monitor tick at the given instant.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<MonitorSummary> {
        let mut summary = MonitorSummary::default();

        // Agents that crossed the response timeout lose all their work.
        let newly_unresponsive = self
            .registry
            .refresh_health(now)
            .await
            .context("Failed to refresh agent health")?;
        for agent in &newly_unresponsive {
            for assignment in self.assignments.list_active_by_agent(&agent.id).await? {
                summary.heartbeat_losses += 1;
                self.handle_failure(
                    assignment,
                    EscalationCause::HeartbeatLoss,
                    EscalationSeverity::High,
                    AssignmentStatus::Reassigned,
                    &mut summary,
                )
                .await?;
            }
        }

        for mut assignment in self.assignments.list_active().await? {
            let task = self
                .queue
                .repo()
                .get(assignment.task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
            if task.is_terminal() {
                // Startup-reconciliation leftovers; close the record.
                assignment.conclude(AssignmentStatus::Superseded);
                self.assignments.update(&assignment).await?;
                self.release_and_unblock(assignment.allocation_id).await?;
                self.registry.adjust_load(&assignment.agent_id, -1).await?;
                continue;
            }

            // Forced cancellation after the grace window.
            if let Some(requested_at) = assignment.cancel_requested_at {
                if now - requested_at > self.config.cancel_grace() {
                    warn!(
                        assignment_id = %assignment.id,
                        task_id = %assignment.task_id,
                        "Cancellation grace expired, forcing"
                    );
                    self.finalize_cancellation(&assignment, "cancellation forced after grace period")
                        .await?;
                    summary.cancellations_forced += 1;
                    continue;
                }
            }

            // Heartbeat silence on this specific assignment.
            if now - assignment.last_heartbeat_at > self.config.response_timeout() {
                summary.heartbeat_losses += 1;
                self.handle_failure(
                    assignment,
                    EscalationCause::HeartbeatLoss,
                    EscalationSeverity::High,
                    AssignmentStatus::Reassigned,
                    &mut summary,
                )
                .await?;
                continue;
            }

            // Progress stall ladder: medium, high, then critical with
            // reassignment.
            if now - assignment.last_progress_at > self.config.progress_timeout() {
                assignment.stall_count += 1;
                summary.stalls += 1;
                let severity = match assignment.stall_count {
                    1 => EscalationSeverity::Medium,
                    2 => EscalationSeverity::High,
                    _ => EscalationSeverity::Critical,
                };
                if assignment.stall_count >= STALL_REASSIGN_THRESHOLD {
                    self.handle_failure(
                        assignment,
                        EscalationCause::ProgressStall,
                        severity,
                        AssignmentStatus::TimedOut,
                        &mut summary,
                    )
                    .await?;
                } else {
                    self.assignments.update(&assignment).await?;
                    let mut task = self
                        .queue
                        .repo()
                        .get(assignment.task_id)
                        .await?
                        .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
                    self.record_escalation(
                        &mut task,
                        Some(assignment.agent_id.clone()),
                        severity,
                        EscalationCause::ProgressStall,
                        EscalationAction::None,
                    )
                    .await?;
                }
                continue;
            }

            // Deadline overrun: reassign once, then hand to a human.
            if now > assignment.expected_deadline && !assignment.deadline_escalated {
                assignment.deadline_escalated = true;
                summary.deadline_overruns += 1;
                if task.reassignment_count == 0 {
                    self.handle_failure(
                        assignment,
                        EscalationCause::DeadlineOverrun,
                        EscalationSeverity::High,
                        AssignmentStatus::TimedOut,
                        &mut summary,
                    )
                    .await?;
                } else {
                    self.assignments.update(&assignment).await?;
                    self.escalate_to_human(
                        assignment,
                        EscalationCause::DeadlineOverrun,
                        EscalationSeverity::Critical,
                        &mut summary,
                    )
                    .await?;
                }
            }
        }

        Ok(summary)
    }

    /// Validate and store a progress report.
    #[instrument(skip(self, summary_line, evidence, blockers), fields(assignment_id = %assignment_id))]
    pub async fn submit_report(
        &self,
        assignment_id: Uuid,
        progress_pct: u8,
        summary_line: &str,
        evidence: Vec<String>,
        blockers: Vec<String>,
        confidence: u8,
    ) -> DomainResult<ReportOutcome> {
        let mut assignment = self.active_assignment(assignment_id).await?;

        // Cooperative cancellation completes on the next report.
        if assignment.cancel_requested_at.is_some() {
            self.finalize_cancellation(&assignment, "canceled on progress report")
                .await?;
            return Ok(ReportOutcome::Canceled);
        }

        assignment.record_heartbeat(Utc::now());

        let invalid_reason = self
            .validate_report(&assignment, progress_pct, &evidence, confidence)
            .await?;

        let mut report = ProgressReport::new(
            assignment_id,
            progress_pct,
            summary_line,
            evidence.clone(),
            blockers,
            confidence,
        );
        report.valid = invalid_reason.is_none();
        self.progress.insert(&report).await?;

        if let Some(reason) = invalid_reason {
            assignment.invalid_report_streak += 1;
            let streak = assignment.invalid_report_streak;
            self.assignments.update(&assignment).await?;
            warn!(
                assignment_id = %assignment_id,
                streak,
                reason = %reason,
                "Invalid progress report stored"
            );
            if streak >= INVALID_REPORT_ESCALATION_THRESHOLD {
                let mut task = self
                    .queue
                    .repo()
                    .get(assignment.task_id)
                    .await?
                    .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
                self.record_escalation(
                    &mut task,
                    Some(assignment.agent_id.clone()),
                    EscalationSeverity::High,
                    EscalationCause::EvidenceInvalid,
                    EscalationAction::None,
                )
                .await?;
            }
            return Ok(ReportOutcome::Invalid { reason });
        }

        assignment.record_valid_report(progress_pct, confidence, Utc::now());
        self.assignments.update(&assignment).await?;

        // First accepted report moves the task from assigned to running.
        let mut task = self
            .queue
            .repo()
            .get(assignment.task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
        if task.status == TaskStatus::Assigned {
            task.transition_to(TaskStatus::Running)?;
            self.queue.repo().update(&task).await?;
        }

        // Completion acceptance path (a): 100 % with resolvable evidence.
        if progress_pct == 100 && !evidence.is_empty() {
            self.accept_completion(&mut assignment).await?;
            return Ok(ReportOutcome::CompletionAccepted);
        }

        Ok(ReportOutcome::Accepted { progress_pct })
    }

    /// Handle an explicit completion message.
    #[instrument(skip(self, evidence), fields(assignment_id = %assignment_id))]
    pub async fn handle_complete(
        &self,
        assignment_id: Uuid,
        evidence: Vec<String>,
    ) -> DomainResult<CompleteOutcome> {
        let mut assignment = self.active_assignment(assignment_id).await?;

        if assignment.cancel_requested_at.is_some() {
            self.finalize_cancellation(&assignment, "canceled on completion message")
                .await?;
            return Ok(CompleteOutcome::Canceled);
        }

        let mut task = self
            .queue
            .repo()
            .get(assignment.task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
        if task.status == TaskStatus::Assigned {
            task.transition_to(TaskStatus::Running)?;
            self.queue.repo().update(&task).await?;
        }
        if task.status == TaskStatus::Running {
            task.transition_to(TaskStatus::AwaitingEvidence)?;
            self.queue.repo().update(&task).await?;
        }

        let rejection = self.validate_completion_evidence(&evidence).await?;
        if let Some(reason) = rejection {
            assignment.invalid_report_streak += 1;
            let streak = assignment.invalid_report_streak;
            self.assignments.update(&assignment).await?;
            if streak >= INVALID_REPORT_ESCALATION_THRESHOLD {
                self.record_escalation(
                    &mut task,
                    Some(assignment.agent_id.clone()),
                    EscalationSeverity::High,
                    EscalationCause::EvidenceInvalid,
                    EscalationAction::None,
                )
                .await?;
            }
            // The agent keeps working; evidence was not accepted.
            let mut task = self
                .queue
                .repo()
                .get(assignment.task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(assignment.task_id))?;
            if task.status == TaskStatus::AwaitingEvidence {
                task.transition_to(TaskStatus::Running)?;
                self.queue.repo().update(&task).await?;
            }
            return Ok(CompleteOutcome::EvidenceRejected { reason });
        }

        let mut report = ProgressReport::new(
            assignment_id,
            100,
            "completion",
            evidence,
            Vec::new(),
            assignment.confidence.max(1),
        );
        report.valid = true;
        self.progress.insert(&report).await?;

        assignment.record_valid_report(100, assignment.confidence.max(1), Utc::now());
        self.assignments.update(&assignment).await?;
        self.accept_completion(&mut assignment).await?;
        Ok(CompleteOutcome::Completed)
    }

    /// Handle an explicit failure message: the task fails for good and
    /// dependents cascade. Silent failures go through reassignment instead.
    #[instrument(skip(self), fields(assignment_id = %assignment_id))]
    pub async fn handle_fail(&self, assignment_id: Uuid, reason: &str) -> DomainResult<()> {
        let mut assignment = self.active_assignment(assignment_id).await?;
        assignment.conclude(AssignmentStatus::Complete);
        self.assignments.update(&assignment).await?;
        self.release_and_unblock(assignment.allocation_id).await?;
        self.registry.adjust_load(&assignment.agent_id, -1).await?;
        self.queue
            .finish(
                assignment.task_id,
                TaskOutcome::Failed {
                    reason: reason.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Record the dispatch acknowledgement.
    pub async fn handle_ack(&self, assignment_id: Uuid) -> DomainResult<()> {
        let mut assignment = self.active_assignment(assignment_id).await?;
        if assignment.acked_at.is_none() {
            assignment.acked_at = Some(Utc::now());
            assignment.record_heartbeat(Utc::now());
            self.assignments.update(&assignment).await?;
        }
        Ok(())
    }

    /// Propagate an agent heartbeat to its active assignments, finalizing
    /// any pending cooperative cancellation.
    pub async fn note_heartbeat(&self, agent_id: &str, now: DateTime<Utc>) -> DomainResult<()> {
        for mut assignment in self.assignments.list_active_by_agent(agent_id).await? {
            if assignment.cancel_requested_at.is_some() {
                self.finalize_cancellation(&assignment, "canceled on heartbeat")
                    .await?;
                continue;
            }
            assignment.record_heartbeat(now);
            self.assignments.update(&assignment).await?;
        }
        Ok(())
    }

    /// Request cooperative cancellation of an in-flight task. Idempotent.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn request_cancel(&self, task_id: Uuid, reason: &str) -> DomainResult<()> {
        let Some(mut assignment) = self.assignments.get_active_for_task(task_id).await? else {
            return Ok(());
        };
        if assignment.cancel_requested_at.is_none() {
            assignment.cancel_requested_at = Some(Utc::now());
            self.assignments.update(&assignment).await?;
            info!(task_id = %task_id, reason, "Cancellation requested, waiting for agent");
            self.events.emit(EventPayload::TaskCancelRequested {
                task_id,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Operator force-completion: completion acceptance path (b).
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn force_complete(&self, task_id: Uuid) -> DomainResult<Task> {
        if let Some(mut assignment) = self.assignments.get_active_for_task(task_id).await? {
            assignment.conclude(AssignmentStatus::Complete);
            self.assignments.update(&assignment).await?;
            self.release_and_unblock(assignment.allocation_id).await?;
            self.registry.adjust_load(&assignment.agent_id, -1).await?;
            self.history.lock().await.record_completion(&assignment.agent_id);
        }
        self.queue.finish(task_id, TaskOutcome::Completed).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn active_assignment(&self, assignment_id: Uuid) -> DomainResult<Assignment> {
        let assignment = self
            .assignments
            .get(assignment_id)
            .await?
            .ok_or(DomainError::AssignmentNotFound(assignment_id))?;
        if !assignment.is_active() {
            return Err(DomainError::AssignmentNotFound(assignment_id));
        }
        Ok(assignment)
    }

    /// Reasons the report is invalid, or None when it passes.
    async fn validate_report(
        &self,
        assignment: &Assignment,
        progress_pct: u8,
        evidence: &[String],
        confidence: u8,
    ) -> DomainResult<Option<String>> {
        if progress_pct > 100 {
            return Ok(Some(format!("progress {progress_pct} exceeds 100")));
        }
        if progress_pct < assignment.progress_pct {
            return Ok(Some(format!(
                "progress {progress_pct} regressed below {}",
                assignment.progress_pct
            )));
        }
        if confidence == 0 || confidence > 100 {
            return Ok(Some(format!("confidence {confidence} outside [1, 100]")));
        }
        if self.config.evidence_validation_required {
            for reference in evidence {
                if !self.resolver.resolve(reference).await? {
                    return Ok(Some(format!("evidence reference {reference:?} did not resolve")));
                }
            }
        }
        Ok(None)
    }

    /// Why the final evidence set is unacceptable, or None when it passes.
    async fn validate_completion_evidence(
        &self,
        evidence: &[String],
    ) -> DomainResult<Option<String>> {
        if evidence.is_empty() {
            return Ok(Some("completion requires at least one evidence reference".to_string()));
        }
        if self.config.evidence_validation_required {
            for reference in evidence {
                if !self.resolver.resolve(reference).await? {
                    return Ok(Some(format!("evidence reference {reference:?} did not resolve")));
                }
            }
        }
        Ok(None)
    }

    /// Conclude the assignment successfully and finalize the task.
    async fn accept_completion(&self, assignment: &mut Assignment) -> DomainResult<()> {
        assignment.conclude(AssignmentStatus::Complete);
        self.assignments.update(assignment).await?;
        self.release_and_unblock(assignment.allocation_id).await?;
        self.registry.adjust_load(&assignment.agent_id, -1).await?;
        self.history.lock().await.record_completion(&assignment.agent_id);
        self.queue
            .finish(assignment.task_id, TaskOutcome::Completed)
            .await?;
        info!(
            assignment_id = %assignment.id,
            task_id = %assignment.task_id,
            agent_id = %assignment.agent_id,
            "Completion accepted"
        );
        Ok(())
    }

    /// Shared failure path: escalate, then reassign (or record only, when
    /// auto-escalation is disabled).
    async fn handle_failure(
        &self,
        assignment: Assignment,
        cause: EscalationCause,
        severity: EscalationSeverity,
        conclude_as: AssignmentStatus,
        summary: &mut MonitorSummary,
    ) -> Result<()> {
        let mut task = self
            .queue
            .repo()
            .get(assignment.task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(assignment.task_id))?;

        if !self.config.auto_escalation_enabled {
            self.record_escalation(
                &mut task,
                Some(assignment.agent_id.clone()),
                severity,
                cause,
                EscalationAction::None,
            )
            .await?;
            self.assignments.update(&assignment).await?;
            return Ok(());
        }

        self.record_escalation(
            &mut task,
            Some(assignment.agent_id.clone()),
            severity,
            cause,
            EscalationAction::Reassign,
        )
        .await?;
        self.reassign(task, assignment, conclude_as, summary).await
    }

    /// The reassignment procedure.
    async fn reassign(
        &self,
        mut task: Task,
        mut assignment: Assignment,
        conclude_as: AssignmentStatus,
        summary: &mut MonitorSummary,
    ) -> Result<()> {
        assignment.conclude(conclude_as);
        self.assignments.update(&assignment).await?;
        self.release_and_unblock(assignment.allocation_id).await?;
        self.registry.adjust_load(&assignment.agent_id, -1).await?;
        self.history.lock().await.record_reassignment(&assignment.agent_id);

        task.reassignment_count += 1;
        if task.reassignment_count > self.config.max_reassignments {
            task.transition_to(TaskStatus::EscalatedToHuman)?;
            self.queue.repo().update(&task).await?;
            let mut task_for_escalation = task;
            self.record_escalation(
                &mut task_for_escalation,
                Some(assignment.agent_id.clone()),
                EscalationSeverity::SystemFailure,
                EscalationCause::ReassignmentExhausted,
                EscalationAction::NotifyHuman,
            )
            .await?;
            summary.escalated_to_human += 1;
            warn!(
                task_id = %task_for_escalation.id,
                "Reassignment budget exhausted, task escalated to human"
            );
            self.events.emit(EventPayload::TaskEscalatedToHuman {
                task_id: task_for_escalation.id,
            });
        } else {
            task.prior_assignment_id = Some(assignment.id);
            task.transition_to(TaskStatus::Ready)?;
            self.queue.repo().update(&task).await?;
            summary.reassigned += 1;
            info!(
                task_id = %task.id,
                attempt = task.reassignment_count,
                from_agent = %assignment.agent_id,
                "Task returned to queue for reassignment"
            );
            self.events.emit(EventPayload::TaskReassigned {
                task_id: task.id,
                from_agent: assignment.agent_id.clone(),
                attempt: task.reassignment_count,
            });
            self.events.emit(EventPayload::TaskReady { task_id: task.id });
        }
        Ok(())
    }

    /// Deadline policy's second strike: hand the task to a human.
    async fn escalate_to_human(
        &self,
        mut assignment: Assignment,
        cause: EscalationCause,
        severity: EscalationSeverity,
        summary: &mut MonitorSummary,
    ) -> Result<()> {
        let mut task = self
            .queue
            .repo()
            .get(assignment.task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(assignment.task_id))?;

        if !self.config.auto_escalation_enabled {
            self.record_escalation(
                &mut task,
                Some(assignment.agent_id.clone()),
                severity,
                cause,
                EscalationAction::None,
            )
            .await?;
            return Ok(());
        }

        assignment.conclude(AssignmentStatus::TimedOut);
        self.assignments.update(&assignment).await?;
        self.release_and_unblock(assignment.allocation_id).await?;
        self.registry.adjust_load(&assignment.agent_id, -1).await?;

        task.transition_to(TaskStatus::EscalatedToHuman)?;
        self.queue.repo().update(&task).await?;
        self.record_escalation(
            &mut task,
            Some(assignment.agent_id.clone()),
            severity,
            cause,
            EscalationAction::NotifyHuman,
        )
        .await?;
        summary.escalated_to_human += 1;
        self.events
            .emit(EventPayload::TaskEscalatedToHuman { task_id: task.id });
        Ok(())
    }

    /// Force-terminate a cancellation-pending assignment and abandon its
    /// task.
    async fn finalize_cancellation(&self, assignment: &Assignment, reason: &str) -> DomainResult<()> {
        let mut concluded = assignment.clone();
        concluded.conclude(AssignmentStatus::Superseded);
        self.assignments.update(&concluded).await?;
        self.release_and_unblock(concluded.allocation_id).await?;
        self.registry.adjust_load(&concluded.agent_id, -1).await?;
        self.queue
            .finish(
                concluded.task_id,
                TaskOutcome::Abandoned {
                    reason: reason.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Release a reservation and let the queue re-evaluate tasks parked
    /// on resources.
    async fn release_and_unblock(&self, allocation_id: Uuid) -> DomainResult<()> {
        self.resources.release(allocation_id).await?;
        let cleared = self.queue.clear_resource_blocks().await?;
        if cleared > 0 {
            tracing::debug!(cleared, "Re-evaluating resource-blocked tasks after release");
        }
        Ok(())
    }

    /// Append an escalation record, bump the task's escalation count, and
    /// publish the event.
    async fn record_escalation(
        &self,
        task: &mut Task,
        agent_id: Option<String>,
        severity: EscalationSeverity,
        cause: EscalationCause,
        action: EscalationAction,
    ) -> DomainResult<Escalation> {
        let escalation = Escalation::new(task.id, agent_id, severity, cause, action);
        self.escalations.insert(&escalation).await?;
        task.escalation_count += 1;
        task.touch();
        self.queue.repo().update(task).await?;
        self.events.emit(EventPayload::EscalationRaised {
            escalation_id: escalation.id,
            task_id: task.id,
            severity,
            cause,
        });
        Ok(escalation)
    }
}
