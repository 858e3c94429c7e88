//! Shared harness for integration tests.
//!
//! Builds a full core over an in-memory SQLite database and provides
//! helpers for driving the agent surface the way a scripted worker would.
//! Restart/rebuild tests manage their own file-backed database through
//! `open_at`.

use std::sync::Arc;

use async_trait::async_trait;
use hive_core::application::HiveCore;
use hive_core::domain::error::DomainResult;
use hive_core::domain::models::{
    AgentDescriptor, AgentRole, Assignment, AssignmentStatus, Config, ResourceSpec, Task,
};
use hive_core::domain::ports::evidence_resolver::EvidenceResolver;
use hive_core::infrastructure::database::DatabaseConnection;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// A core plus a handle to the pool it runs on, for tests that need to
/// reach the store out of band.
#[allow(dead_code)]
pub struct TestCore {
    pub core: HiveCore,
    pub pool: SqlitePool,
}

impl std::ops::Deref for TestCore {
    type Target = HiveCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// Resolver that rejects references with the `bad:` prefix.
pub struct PrefixResolver;

#[async_trait]
impl EvidenceResolver for PrefixResolver {
    async fn resolve(&self, reference: &str) -> DomainResult<bool> {
        Ok(!reference.trim().is_empty() && !reference.starts_with("bad:"))
    }
}

/// Create a migrated in-memory database for testing.
pub async fn setup_test_pool() -> SqlitePool {
    let db = DatabaseConnection::new("sqlite::memory:")
        .await
        .expect("failed to create test database");
    db.migrate().await.expect("failed to run migrations");
    db.pool().clone()
}

pub async fn new_core_with(config: Config) -> TestCore {
    let pool = setup_test_pool().await;
    let core = HiveCore::build_with_plugins(
        config,
        pool.clone(),
        Arc::new(PrefixResolver),
        None,
    );
    TestCore { core, pool }
}

pub async fn new_core() -> TestCore {
    new_core_with(Config::default()).await
}

/// Open a core over a file-backed database in the given directory. Used by
/// restart/rebuild tests, which reopen the same file across core
/// instances.
#[allow(dead_code)]
pub async fn open_at(config: Config, dir: &TempDir) -> HiveCore {
    let path = dir.path().join("hive.db");
    let url = format!("sqlite:{}", path.display());
    let db = DatabaseConnection::new(&url).await.expect("connect");
    db.migrate().await.expect("migrate");
    HiveCore::build_with_plugins(
        config,
        db.pool().clone(),
        Arc::new(PrefixResolver),
        None,
    )
}

/// An agent descriptor with one capability and a small footprint.
pub fn agent(id: &str, capability: &str, capacity: u32) -> AgentDescriptor {
    AgentDescriptor::new(id, AgentRole::Build, capacity)
        .with_capability(capability)
        .with_footprint(ResourceSpec::new(1, 256, 0, 0))
}

/// A task of the given kind with a small resource requirement.
pub fn task(title: &str, kind: &str, priority: i32) -> Task {
    Task::new(title, format!("{title} description"), kind)
        .with_priority(priority)
        .with_resources(ResourceSpec::new(1, 256, 0, 0))
}

/// The single active assignment of a task, from its audit trail.
pub async fn active_assignment(core: &HiveCore, task_id: uuid::Uuid) -> Option<Assignment> {
    core.task_history(task_id)
        .await
        .ok()?
        .assignments
        .into_iter()
        .find(|a| a.status == AssignmentStatus::Active)
}
