//! The cooperative orchestration loop.
//!
//! One task hosts both tick timers and the intake queue in a single
//! `select!` loop, so every mutation of queue, registry, and ledger state
//! is serialized through one writer. Agent-facing I/O never blocks the
//! loop; callers wait on oneshot replies.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::application::hive::HiveCore;
use crate::application::intake::{CoreHandle, IntakeMessage};
use crate::services::event_bus::EventPayload;

/// Intake channel depth; submissions past this apply backpressure to the
/// caller, never to the loop.
const INTAKE_BUFFER: usize = 1024;

/// Runs the scheduler and monitor ticks plus intake handling.
pub struct Orchestrator {
    core: Arc<HiveCore>,
    intake_rx: mpsc::Receiver<IntakeMessage>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Wrap an assembled core into a loop plus its handle.
    pub fn new(core: HiveCore) -> (Self, CoreHandle) {
        let (tx, rx) = mpsc::channel(INTAKE_BUFFER);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = CoreHandle::new(tx, shutdown_tx.clone());
        (
            Self {
                core: Arc::new(core),
                intake_rx: rx,
                shutdown_tx,
            },
            handle,
        )
    }

    /// Direct access to the core, for wiring and tests.
    pub fn core(&self) -> Arc<HiveCore> {
        Arc::clone(&self.core)
    }

    /// Reconcile from the store, then run until shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.core
            .reconcile()
            .await
            .context("Boot reconciliation failed")?;

        let config = self.core.config().core.clone();
        let mut scheduler_timer = interval(config.scheduling_interval());
        scheduler_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monitor_timer = interval(config.check_interval());
        monitor_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            scheduling_interval_secs = config.scheduling_interval_seconds,
            check_interval_secs = config.check_interval_seconds,
            "Orchestrator loop started"
        );
        self.core.events().emit(EventPayload::OrchestratorStarted);

        loop {
            tokio::select! {
                Some(message) = self.intake_rx.recv() => {
                    let dispatch_now = self.handle(message).await;
                    // Submission and completion events schedule eagerly
                    // instead of waiting for the next timer tick.
                    if dispatch_now {
                        if let Err(e) = self.core.tick_scheduler(Utc::now()).await {
                            error!(error = ?e, "Scheduler tick failed");
                        }
                    }
                }
                _ = scheduler_timer.tick() => {
                    if let Err(e) = self.core.tick_scheduler(Utc::now()).await {
                        error!(error = ?e, "Scheduler tick failed");
                    }
                }
                _ = monitor_timer.tick() => {
                    match self.core.tick_monitor(Utc::now()).await {
                        Ok(summary) if summary.reassigned > 0 => {
                            // Reassigned tasks are ready again; offer them
                            // without waiting out the scheduler interval.
                            if let Err(e) = self.core.tick_scheduler(Utc::now()).await {
                                error!(error = ?e, "Scheduler tick failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = ?e, "Monitor tick failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping between ticks");
                    break;
                }
            }
        }

        self.core.events().emit(EventPayload::OrchestratorStopped);
        Ok(())
    }

    /// Handle one intake message. Returns whether a scheduler tick should
    /// run immediately.
    async fn handle(&self, message: IntakeMessage) -> bool {
        match message {
            IntakeMessage::Submit { task, reply } => {
                let result = self.core.submit(task).await;
                let dispatch = result.is_ok();
                let _ = reply.send(result);
                dispatch
            }
            IntakeMessage::Register { descriptor, reply } => {
                let result = self.core.register(descriptor).await;
                let dispatch = result.is_ok();
                let _ = reply.send(result);
                dispatch
            }
            IntakeMessage::Heartbeat {
                agent_id,
                timestamp,
                health_signal,
                reply,
            } => {
                let _ = reply.send(self.core.heartbeat(&agent_id, timestamp, health_signal).await);
                false
            }
            IntakeMessage::AssignmentAck {
                assignment_id,
                reply,
            } => {
                let _ = reply.send(self.core.assignment_ack(assignment_id).await);
                false
            }
            IntakeMessage::Progress {
                assignment_id,
                progress_pct,
                summary,
                evidence,
                blockers,
                confidence,
                reply,
            } => {
                let result = self
                    .core
                    .progress(assignment_id, progress_pct, &summary, evidence, blockers, confidence)
                    .await;
                let dispatch = matches!(
                    result,
                    Ok(crate::services::monitor::ReportOutcome::CompletionAccepted)
                );
                let _ = reply.send(result);
                dispatch
            }
            IntakeMessage::Complete {
                assignment_id,
                evidence,
                reply,
            } => {
                let result = self.core.complete(assignment_id, evidence).await;
                let dispatch = matches!(
                    result,
                    Ok(crate::services::monitor::CompleteOutcome::Completed)
                );
                let _ = reply.send(result);
                dispatch
            }
            IntakeMessage::Fail {
                assignment_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.core.fail(assignment_id, &reason).await);
                false
            }
            IntakeMessage::Cancel {
                task_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.core.cancel(task_id, &reason).await);
                false
            }
            IntakeMessage::ForceComplete { task_id, reply } => {
                let result = self.core.force_complete(task_id).await;
                let dispatch = result.is_ok();
                let _ = reply.send(result);
                dispatch
            }
            IntakeMessage::DrainAgent { agent_id, reply } => {
                let _ = reply.send(self.core.drain_agent(&agent_id).await);
                false
            }
            IntakeMessage::AdjustWeights { weights, reply } => {
                let _ = reply.send(self.core.adjust_policy_weights(weights).await);
                false
            }
            IntakeMessage::SetPolicy { kind, reply } => {
                self.core.set_policy(kind).await;
                let _ = reply.send(Ok(()));
                false
            }
            IntakeMessage::ResolveEscalation {
                escalation_id,
                reply,
            } => {
                let _ = reply.send(self.core.resolve_escalation(escalation_id).await);
                false
            }
            IntakeMessage::QueueStats { reply } => {
                let _ = reply.send(self.core.queue_stats().await);
                false
            }
            IntakeMessage::ListAgents { filter, reply } => {
                let _ = reply.send(self.core.list_agents(&filter).await);
                false
            }
            IntakeMessage::ListEscalations {
                unresolved_only,
                reply,
            } => {
                let _ = reply.send(self.core.list_escalations(unresolved_only).await);
                false
            }
            IntakeMessage::TaskHistory { task_id, reply } => {
                let _ = reply.send(self.core.task_history(task_id).await);
                false
            }
        }
    }
}
