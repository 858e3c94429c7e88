//! Drives a running orchestrator loop through its handle, the way real
//! agents and operators do.

mod common;

use std::time::Duration;

use common::{agent, new_core_with, task};
use hive_core::application::Orchestrator;
use hive_core::domain::models::{AssignmentStatus, Config, TaskStatus};
use hive_core::services::monitor::ReportOutcome;
use hive_core::services::agent_registry::RegisterOutcome;

#[tokio::test]
async fn loop_dispatches_and_completes_through_handle() {
    let mut config = Config::default();
    config.core.scheduling_interval_seconds = 1;
    config.core.check_interval_seconds = 1;
    let core = new_core_with(config).await.core;

    let (orchestrator, handle) = Orchestrator::new(core);
    let loop_task = tokio::spawn(orchestrator.run());

    assert_eq!(
        handle.register(agent("agent-a", "build", 1)).await.unwrap(),
        RegisterOutcome::Registered
    );
    let t1 = handle.submit(task("T1", "build", 5)).await.unwrap().task_id();

    // Submission triggers an eager scheduling pass; the assignment shows
    // up in the history without waiting for the timer.
    let mut assignment = None;
    for _ in 0..50 {
        let history = handle.task_history(t1).await.unwrap();
        if let Some(a) = history
            .assignments
            .into_iter()
            .find(|a| a.status == AssignmentStatus::Active)
        {
            assignment = Some(a);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let assignment = assignment.expect("task was dispatched");
    assert_eq!(assignment.agent_id, "agent-a");

    handle.assignment_ack(assignment.id).await.unwrap();
    handle.heartbeat("agent-a", None).await.unwrap();
    let outcome = handle
        .progress(
            assignment.id,
            100,
            "done",
            vec!["artifact-h1".to_string()],
            vec![],
            90,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ReportOutcome::CompletionAccepted);

    let history = handle.task_history(t1).await.unwrap();
    assert_eq!(history.task.status, TaskStatus::Completed);

    let stats = handle.queue_stats().await.unwrap();
    assert_eq!(stats.counts.get(&TaskStatus::Completed), Some(&1));

    handle.shutdown();
    loop_task.await.unwrap().unwrap();
}
