//! End-to-end scheduling scenarios driven through the core facade with
//! manual ticks and a scripted agent.

mod common;

use chrono::Utc;
use common::{active_assignment, agent, new_core, task};
use hive_core::domain::models::TaskStatus;
use hive_core::services::monitor::ReportOutcome;
use hive_core::services::agent_registry::{AgentFilter, RegisterOutcome};

/// S1: one agent, one task, progress to completion with evidence.
#[tokio::test]
async fn simple_path_completes_with_evidence() {
    let core = new_core().await;
    let now = Utc::now();

    assert_eq!(
        core.register(agent("agent-a", "build", 1)).await.unwrap(),
        RegisterOutcome::Registered
    );

    let outcome = core.submit(task("T1", "build", 5)).await.unwrap();
    let t1 = outcome.task_id();

    // Empty prerequisite list: ready immediately.
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Ready);

    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 1);
    let assignment = active_assignment(&core, t1).await.expect("active assignment");
    assert_eq!(assignment.agent_id, "agent-a");
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Assigned);

    core.assignment_ack(assignment.id).await.unwrap();

    let r = core
        .progress(assignment.id, 50, "halfway", vec![], vec![], 80)
        .await
        .unwrap();
    assert_eq!(r, ReportOutcome::Accepted { progress_pct: 50 });
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Running);

    let r = core
        .progress(assignment.id, 100, "done", vec!["artifact-h1".to_string()], vec![], 95)
        .await
        .unwrap();
    assert_eq!(r, ReportOutcome::CompletionAccepted);

    // Task completed, load back to zero, ledger empty.
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Completed);
    let agents = core.list_agents(&AgentFilter::default()).await.unwrap();
    assert_eq!(agents[0].current_load, 0);
    let snapshot = core.resource_snapshot().await;
    assert!(snapshot.reserved.is_zero());
    assert_eq!(snapshot.live_reservations, 0);
}

/// S2: a dependency chain never runs both tasks at once.
#[tokio::test]
async fn dependency_chain_runs_sequentially() {
    let core = new_core().await;
    let now = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();

    let t1 = core.submit(task("T1", "build", 0)).await.unwrap().task_id();
    let t2 = core
        .submit(task("T2", "build", 0).with_prerequisite(t1))
        .await
        .unwrap()
        .task_id();

    assert_eq!(core.get_task(t2).await.unwrap().unwrap().status, TaskStatus::Pending);

    core.tick_scheduler(now).await.unwrap();
    let a1 = active_assignment(&core, t1).await.expect("T1 assigned");
    assert!(active_assignment(&core, t2).await.is_none());

    // T2 stays pending while T1 runs.
    core.tick_scheduler(now).await.unwrap();
    assert_eq!(core.get_task(t2).await.unwrap().unwrap().status, TaskStatus::Pending);

    core.assignment_ack(a1.id).await.unwrap();
    core.complete(a1.id, vec!["artifact-1".to_string()]).await.unwrap();

    // Completion unblocks the dependent; the next tick assigns it.
    assert_eq!(core.get_task(t2).await.unwrap().unwrap().status, TaskStatus::Ready);
    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 1);
    assert!(active_assignment(&core, t2).await.is_some());
}

/// S3: priority re-orders the queue but never pre-empts running work.
#[tokio::test]
async fn priority_orders_queue_without_preemption() {
    let core = new_core().await;
    let now = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();

    let t_low = core.submit(task("T1", "build", 1)).await.unwrap().task_id();
    let t_high = core.submit(task("T2", "build", 9)).await.unwrap().task_id();

    core.tick_scheduler(now).await.unwrap();

    // The higher priority task went first.
    assert!(active_assignment(&core, t_high).await.is_some());
    assert_eq!(core.get_task(t_low).await.unwrap().unwrap().status, TaskStatus::Ready);

    // A later, even higher-priority submission waits: no pre-emption.
    let t_urgent = core.submit(task("T3", "build", 99)).await.unwrap().task_id();
    core.tick_scheduler(now).await.unwrap();
    assert!(active_assignment(&core, t_urgent).await.is_none());
    assert!(active_assignment(&core, t_high).await.is_some());
}

/// A second agent with spare capacity picks up remaining work.
#[tokio::test]
async fn two_agents_share_the_backlog() {
    let core = new_core().await;
    let now = Utc::now();
    core.register(agent("agent-a", "build", 1)).await.unwrap();
    core.register(agent("agent-b", "build", 1)).await.unwrap();

    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    let t2 = core.submit(task("T2", "build", 5)).await.unwrap().task_id();

    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 2);

    let a1 = active_assignment(&core, t1).await.unwrap();
    let a2 = active_assignment(&core, t2).await.unwrap();
    assert_ne!(a1.agent_id, a2.agent_id);
}

/// Capability mismatch leaves tasks queued even with idle agents.
#[tokio::test]
async fn capability_mismatch_leaves_task_queued() {
    let core = new_core().await;
    let now = Utc::now();
    core.register(agent("agent-a", "review", 1)).await.unwrap();

    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();
    let summary = core.tick_scheduler(now).await.unwrap();
    assert_eq!(summary.dispatched, 0);
    assert_eq!(core.get_task(t1).await.unwrap().unwrap().status, TaskStatus::Ready);
}
