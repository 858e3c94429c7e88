//! Restarting the process and rebuilding from the durable store
//! reproduces the same state.
//!
//! These tests run on a file-backed database of their own so a second
//! core instance can reopen the same file.

mod common;

use chrono::Utc;
use common::{active_assignment, agent, open_at, task};
use hive_core::domain::models::{Config, TaskStatus};
use hive_core::services::agent_registry::AgentFilter;
use tempfile::TempDir;

/// A fresh core over the same database sees the same queue, agents, and
/// ledger after reconciliation.
#[tokio::test]
async fn rebuild_reproduces_state() {
    let dir = TempDir::new().expect("tempdir");
    let core = open_at(Config::default(), &dir).await;
    let t0 = Utc::now();

    core.register(agent("agent-a", "build", 2)).await.unwrap();
    let running = core.submit(task("running", "build", 5)).await.unwrap().task_id();
    let queued = core.submit(task("queued", "build", 1)).await.unwrap().task_id();
    let done = core.submit(task("done", "build", 9)).await.unwrap().task_id();

    core.tick_scheduler(t0).await.unwrap();
    core.tick_scheduler(t0).await.unwrap();
    // Two of the three are in flight (capacity 2); finish one.
    let a_done = active_assignment(&core, done).await.unwrap();
    core.assignment_ack(a_done.id).await.unwrap();
    core.complete(a_done.id, vec!["artifact".to_string()]).await.unwrap();
    let a_running = active_assignment(&core, running).await.unwrap();
    core.assignment_ack(a_running.id).await.unwrap();
    core.progress(a_running.id, 40, "going", vec![], vec![], 80).await.unwrap();

    let before_stats = core.queue_stats().await.unwrap();
    let before_snapshot = core.resource_snapshot().await;

    // "Restart": a second core over the same database file.
    let reopened = open_at(Config::default(), &dir).await;
    reopened.reconcile().await.unwrap();

    let after_stats = reopened.queue_stats().await.unwrap();
    assert_eq!(before_stats.counts, after_stats.counts);
    assert_eq!(before_stats.live, after_stats.live);

    let after_snapshot = reopened.resource_snapshot().await;
    assert_eq!(before_snapshot.reserved, after_snapshot.reserved);
    assert_eq!(
        before_snapshot.live_reservations,
        after_snapshot.live_reservations
    );

    assert_eq!(
        reopened.get_task(running).await.unwrap().unwrap().status,
        TaskStatus::Running
    );
    assert_eq!(
        reopened.get_task(queued).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
    assert_eq!(
        reopened.get_task(done).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );

    let agents = reopened.list_agents(&AgentFilter::default()).await.unwrap();
    assert_eq!(agents[0].current_load, 1);

    // The rebuilt core keeps working: the running assignment completes.
    let a = active_assignment(&reopened, running).await.unwrap();
    reopened.complete(a.id, vec!["artifact-2".to_string()]).await.unwrap();
    assert_eq!(
        reopened.get_task(running).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
}

/// Reconciliation returns tasks whose assignment vanished to the queue.
#[tokio::test]
async fn reconcile_repairs_orphaned_tasks() {
    use hive_core::domain::ports::TaskRepository;
    use hive_core::infrastructure::database::{DatabaseConnection, TaskRepositoryImpl};

    let dir = TempDir::new().expect("tempdir");
    let core = open_at(Config::default(), &dir).await;
    let t1 = core.submit(task("T1", "build", 5)).await.unwrap().task_id();

    // Corrupt the store the way a crash between the two halves of a
    // dispatch would: task assigned, no assignment row.
    let path = dir.path().join("hive.db");
    let url = format!("sqlite:{}", path.display());
    let db = DatabaseConnection::new(&url).await.unwrap();
    let repo = TaskRepositoryImpl::new(db.pool().clone());
    let mut stranded = repo.get(t1).await.unwrap().unwrap();
    stranded.force_status(TaskStatus::Assigned, "test: simulate crash");
    repo.update(&stranded).await.unwrap();

    let reopened = open_at(Config::default(), &dir).await;
    let summary = reopened.reconcile().await.unwrap();
    assert_eq!(summary.orphaned_tasks, 1);
    assert_eq!(
        reopened.get_task(t1).await.unwrap().unwrap().status,
        TaskStatus::Ready
    );
}
