//! Accountability monitor scenarios: stalls, heartbeat loss, reassignment
//! exhaustion, evidence validation, and cooperative cancellation.

mod common;

use chrono::{Duration, Utc};
use common::{active_assignment, agent, new_core, new_core_with, task};
use hive_core::application::CoreCancelOutcome;
use hive_core::domain::models::{
    AgentHealth, Config, EscalationCause, EscalationSeverity, TaskStatus,
};
use hive_core::services::monitor::{CompleteOutcome, ReportOutcome};
use hive_core::services::agent_registry::AgentFilter;

/// S4: progress stalls escalate medium, high, critical, then reassign.
#[tokio::test]
async fn progress_stall_ladder_reassigns_on_third_strike() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();

    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();
    core.progress(a.id, 10, "started", vec![], vec![], 70).await.unwrap();

    // Agent keeps heartbeating but reports nothing for over the timeout.
    let mut escalation_count = 0;
    for minutes in [31, 32, 33] {
        let now = t0 + Duration::minutes(minutes);
        core.heartbeat("agent-a", now, None).await.unwrap();
        let summary = core.tick_monitor(now).await.unwrap();
        assert_eq!(summary.stalls, 1);
        escalation_count += 1;
        if minutes < 33 {
            assert_eq!(summary.reassigned, 0);
        } else {
            assert_eq!(summary.reassigned, 1);
        }
    }
    assert_eq!(escalation_count, 3);

    let history = core.task_history(t1).await.unwrap();
    let severities: Vec<EscalationSeverity> =
        history.escalations.iter().map(|e| e.severity).collect();
    assert_eq!(
        severities,
        vec![
            EscalationSeverity::Medium,
            EscalationSeverity::High,
            EscalationSeverity::Critical
        ]
    );
    assert!(history
        .escalations
        .iter()
        .all(|e| e.cause == EscalationCause::ProgressStall));

    // The old attempt concluded, resources freed, task ready again.
    let task_after = core.get_task(t1).await.unwrap().unwrap();
    assert_eq!(task_after.status, TaskStatus::Ready);
    assert_eq!(task_after.reassignment_count, 1);
    assert!(core.resource_snapshot().await.reserved.is_zero());

    // The previous agent is excluded; with only agent-a the task waits.
    let now = t0 + Duration::minutes(34);
    core.heartbeat("agent-a", now, None).await.unwrap();
    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 0);
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Ready);

    // A fresh agent with matching capabilities picks it up.
    core.register(agent("agent-b", "build", 1)).await.unwrap();
    core.heartbeat("agent-b", now, None).await.unwrap();
    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 1);
    let new_assignment = active_assignment(&core, t1).await.unwrap();
    assert_eq!(new_assignment.agent_id, "agent-b");
}

/// S5: heartbeat loss marks the agent unresponsive and reassigns its work.
#[tokio::test]
async fn heartbeat_loss_reassigns_all_agent_work() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();

    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();

    // Silence past the response timeout.
    let now = t0 + Duration::minutes(6);
    let summary = core.tick_monitor(now).await.unwrap();
    assert!(summary.heartbeat_losses >= 1);

    let agents = core.list_agents(&AgentFilter::default()).await.unwrap();
    assert_eq!(agents[0].health, AgentHealth::Unresponsive);

    let task_after = core.get_task(t1).await.unwrap().unwrap();
    assert_eq!(task_after.status, TaskStatus::Ready);
    assert_eq!(task_after.reassignment_count, 1);

    // The descriptor survives but the agent is ineligible for new work.
    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 0);

    // Heartbeats resume: the agent is eligible again (but still excluded
    // from the task it just lost).
    core.heartbeat("agent-a", now + Duration::seconds(10), None).await.unwrap();
    let agents = core.list_agents(&AgentFilter::default()).await.unwrap();
    assert_eq!(agents[0].health, AgentHealth::Healthy);
}

/// S6: exhausting the reassignment budget hands the task to a human.
#[tokio::test]
async fn reassignment_exhaustion_escalates_to_human() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    core.register(agent("agent-b", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();

    // Three attempts, each lost to heartbeat silence. Agents alternate
    // because the previous holder is excluded.
    let mut now = t0;
    for round in 0..3 {
        // The agent not holding the task heartbeats so it stays healthy.
        let assignment = active_assignment(&core, t1).await;
        if assignment.is_none() {
            for id in ["agent-a", "agent-b"] {
                core.heartbeat(id, now, None).await.unwrap();
            }
            let summary = core.tick_scheduler(now).await.unwrap();
            assert_eq!(summary.dispatched, 1, "round {round}");
        }
        let assignment = active_assignment(&core, t1).await.unwrap();
        core.assignment_ack(assignment.id).await.unwrap();

        // Everyone falls silent past the response timeout; only the other
        // agent comes back.
        now += Duration::minutes(6);
        let other = if assignment.agent_id == "agent-a" {
            "agent-b"
        } else {
            "agent-a"
        };
        core.tick_monitor(now).await.unwrap();
        core.heartbeat(other, now, None).await.unwrap();
    }

    let task_after = core.get_task(t1).await.unwrap().unwrap();
    assert_eq!(task_after.status, TaskStatus::EscalatedToHuman);
    assert_eq!(task_after.reassignment_count, 3);

    let history = core.task_history(t1).await.unwrap();
    let terminal = history
        .escalations
        .iter()
        .find(|e| e.severity == EscalationSeverity::SystemFailure)
        .expect("system-failure escalation");
    assert_eq!(terminal.cause, EscalationCause::ReassignmentExhausted);

    // Terminal states are absorbing: no further automated action.
    let summary = core.tick_monitor(now + Duration::minutes(6)).await.unwrap();
    assert_eq!(summary.reassigned, 0);
    assert_eq!(summary.escalated_to_human, 0);
}

/// Progress percentage must be monotone; regressions are stored invalid.
#[tokio::test]
async fn regressed_progress_is_invalid() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();

    core.progress(a.id, 60, "most of it", vec![], vec![], 80).await.unwrap();
    let r = core.progress(a.id, 40, "went backwards", vec![], vec![], 80).await.unwrap();
    assert!(matches!(r, ReportOutcome::Invalid { .. }));

    // The assignment's view of progress did not move.
    let a = active_assignment(&core, t1).await.unwrap();
    assert_eq!(a.progress_pct, 60);

    let history = core.task_history(t1).await.unwrap();
    let invalid: Vec<_> = history.reports.iter().filter(|r| !r.valid).collect();
    assert_eq!(invalid.len(), 1);
}

/// Three invalid reports in a row raise an evidence-invalid escalation.
#[tokio::test]
async fn invalid_report_streak_escalates() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();

    for _ in 0..3 {
        let r = core
            .progress(a.id, 30, "claims", vec!["bad:nonexistent".to_string()], vec![], 80)
            .await
            .unwrap();
        assert!(matches!(r, ReportOutcome::Invalid { .. }));
    }

    let history = core.task_history(t1).await.unwrap();
    assert!(history
        .escalations
        .iter()
        .any(|e| e.cause == EscalationCause::EvidenceInvalid
            && e.severity == EscalationSeverity::High));
}

/// Completion without resolvable evidence is rejected; the agent keeps
/// working.
#[tokio::test]
async fn completion_requires_resolvable_evidence() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();

    let r = core.complete(a.id, vec![]).await.unwrap();
    assert!(matches!(r, CompleteOutcome::EvidenceRejected { .. }));

    let r = core.complete(a.id, vec!["bad:hash".to_string()]).await.unwrap();
    assert!(matches!(r, CompleteOutcome::EvidenceRejected { .. }));
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Running);

    let r = core.complete(a.id, vec!["commit:abc123".to_string()]).await.unwrap();
    assert_eq!(r, CompleteOutcome::Completed);
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Completed);
}

/// Deadline overrun reassigns once, then escalates to a human.
#[tokio::test]
async fn deadline_overrun_reassigns_once_then_escalates() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    core.register(agent("agent-b", "build", 1)).await.unwrap();

    // 60 s estimate, 1.5 multiplier: 90 s budget per attempt.
    let t1 = core
        .submit(task("T1", "build", 5).with_estimate(60))
        .await
        .unwrap()
        .task_id();

    core.tick_scheduler(t0).await.unwrap();
    let a1 = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a1.id).await.unwrap();

    // Keep heartbeats and progress fresh so only the deadline fires.
    let now = t0 + Duration::minutes(2);
    core.heartbeat(&a1.agent_id, now, None).await.unwrap();
    core.progress(a1.id, 10, "slow going", vec![], vec![], 50).await.unwrap();
    let summary = core.tick_monitor(now).await.unwrap();
    assert_eq!(summary.deadline_overruns, 1);
    assert_eq!(summary.reassigned, 1);
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().reassignment_count, 1);

    // Second attempt on the other agent also overruns: human takes over.
    for id in ["agent-a", "agent-b"] {
        core.heartbeat(id, now, None).await.unwrap();
    }
    core.tick_scheduler(now).await.unwrap();
    let a2 = active_assignment(&core, t1).await.unwrap();
    assert_ne!(a2.agent_id, a1.agent_id);
    core.assignment_ack(a2.id).await.unwrap();

    let later = now + Duration::minutes(2);
    core.heartbeat(&a2.agent_id, later, None).await.unwrap();
    core.progress(a2.id, 20, "still slow", vec![], vec![], 50).await.unwrap();
    let summary = core.tick_monitor(later).await.unwrap();
    assert_eq!(summary.deadline_overruns, 1);
    assert_eq!(summary.escalated_to_human, 1);
    assert_eq!(
        core.get_task(t1).await.unwrap().unwrap().status,
        TaskStatus::EscalatedToHuman
    );
}

/// Cooperative cancellation lands on the next report; the grace timeout
/// forces it for silent agents.
#[tokio::test]
async fn cancellation_is_cooperative_then_forced() {
    let core = new_core().await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 2)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    let t2 = core.submit(task("T2", "build", 5)).await.unwrap().task_id();
    // One offer per agent per tick; two ticks fill both capacity slots.
    core.tick_scheduler(t0).await.unwrap();
    core.tick_scheduler(t0).await.unwrap();

    let a1 = active_assignment(&core, t1).await.unwrap();
    let a2 = active_assignment(&core, t2).await.unwrap();
    core.assignment_ack(a1.id).await.unwrap();
    core.assignment_ack(a2.id).await.unwrap();

    // Cooperative: the next progress report finalizes the cancellation.
    assert_eq!(
        core.cancel(t1, "not needed").await.unwrap(),
        CoreCancelOutcome::CancellationRequested
    );
    let r = core.progress(a1.id, 30, "working", vec![], vec![], 80).await.unwrap();
    assert_eq!(r, ReportOutcome::Canceled);
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Abandoned);

    // Forced: a silent agent is cut off after the grace window.
    assert_eq!(
        core.cancel(t2, "also not needed").await.unwrap(),
        CoreCancelOutcome::CancellationRequested
    );
    let now = t0 + Duration::seconds(120);
    core.heartbeat("agent-a", now, None).await.unwrap();
    // The heartbeat itself finalizes the pending cancellation.
    assert_eq!(core.get_task(t2).await.unwrap().unwrap().status, TaskStatus::Abandoned);

    // All resources returned.
    assert!(core.resource_snapshot().await.reserved.is_zero());
}

/// With auto-escalation disabled the monitor records but never reassigns.
#[tokio::test]
async fn auto_escalation_disabled_records_only() {
    let mut config = Config::default();
    config.core.auto_escalation_enabled = false;
    let core = new_core_with(config).await;
    let t0 = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    core.tick_scheduler(t0).await.unwrap();
    let a = active_assignment(&core, t1).await.unwrap();
    core.assignment_ack(a.id).await.unwrap();

    let now = t0 + Duration::minutes(6);
    let summary = core.tick_monitor(now).await.unwrap();
    assert!(summary.heartbeat_losses >= 1);
    assert_eq!(summary.reassigned, 0);

    // The assignment is still active and the task still assigned.
    assert!(active_assignment(&core, t1).await.is_some());
    let history = core.task_history(t1).await.unwrap();
    assert!(!history.escalations.is_empty());
}
