//! Database connection pool manager.
//!
//! Manages the SQLite connection pool with WAL mode enabled for better
//! concurrency. Handles connection lifecycle, schema creation, and
//! configuration.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

/// Embedded schema for the five durable collections plus the resource
/// ledger. Executed statement by statement; every statement is idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        kind TEXT NOT NULL,
        priority INTEGER NOT NULL,
        status TEXT NOT NULL,
        prerequisites TEXT NOT NULL,
        parent_id TEXT,
        prior_assignment_id TEXT,
        reassignment_count INTEGER NOT NULL DEFAULT 0,
        escalation_count INTEGER NOT NULL DEFAULT 0,
        cpu_cores INTEGER NOT NULL DEFAULT 0,
        memory_mb INTEGER NOT NULL DEFAULT 0,
        disk_mb INTEGER NOT NULL DEFAULT 0,
        network_mbps INTEGER NOT NULL DEFAULT 0,
        estimated_duration_secs INTEGER NOT NULL DEFAULT 3600,
        blocked_on_resources INTEGER NOT NULL DEFAULT 0,
        idempotency_key TEXT,
        failure_reason TEXT,
        submitted_at TEXT NOT NULL,
        deadline TEXT,
        started_at TEXT,
        completed_at TEXT,
        updated_at TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_idempotency
        ON tasks(idempotency_key) WHERE idempotency_key IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS assignments (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        allocation_id TEXT NOT NULL,
        status TEXT NOT NULL,
        assigned_at TEXT NOT NULL,
        expected_deadline TEXT NOT NULL,
        acked_at TEXT,
        last_heartbeat_at TEXT NOT NULL,
        last_progress_at TEXT NOT NULL,
        progress_pct INTEGER NOT NULL DEFAULT 0,
        confidence INTEGER NOT NULL DEFAULT 0,
        stall_count INTEGER NOT NULL DEFAULT 0,
        invalid_report_streak INTEGER NOT NULL DEFAULT 0,
        deadline_escalated INTEGER NOT NULL DEFAULT 0,
        cancel_requested_at TEXT,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_assignments_task ON assignments(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_assignments_agent ON assignments(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_assignments_status ON assignments(status)",
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        capabilities TEXT NOT NULL,
        capacity INTEGER NOT NULL,
        current_load INTEGER NOT NULL DEFAULT 0,
        cpu_cores INTEGER NOT NULL DEFAULT 0,
        memory_mb INTEGER NOT NULL DEFAULT 0,
        disk_mb INTEGER NOT NULL DEFAULT 0,
        network_mbps INTEGER NOT NULL DEFAULT 0,
        last_heartbeat_at TEXT NOT NULL,
        health TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 1.0,
        registered_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS progress (
        id TEXT PRIMARY KEY,
        assignment_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        progress_pct INTEGER NOT NULL,
        summary TEXT NOT NULL,
        evidence TEXT NOT NULL,
        blockers TEXT NOT NULL,
        confidence INTEGER NOT NULL,
        valid INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_progress_assignment ON progress(assignment_id)",
    "CREATE TABLE IF NOT EXISTS escalations (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        agent_id TEXT,
        severity TEXT NOT NULL,
        cause TEXT NOT NULL,
        action TEXT NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        resolved_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_escalations_task ON escalations(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_escalations_resolved ON escalations(resolved)",
    "CREATE TABLE IF NOT EXISTS ledger (
        allocation_id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        task_id TEXT,
        cpu_cores INTEGER NOT NULL,
        memory_mb INTEGER NOT NULL,
        disk_mb INTEGER NOT NULL,
        network_mbps INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Database connection pool manager.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new database connection pool with WAL mode enabled.
    ///
    /// # Configuration
    /// - Journal mode: WAL (Write-Ahead Logging)
    /// - Synchronous: NORMAL (good balance of safety and performance)
    /// - Foreign keys: enabled
    /// - Busy timeout: 5 seconds
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    /// Create a pool with an explicit connection ceiling.
    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so an
        // in-memory pool must stay at exactly one connection.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Create the schema. Safe to call on every boot.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to apply schema statement")?;
        }
        Ok(())
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_connection_and_schema() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        // Second migrate must be a no-op
        db.migrate().await.unwrap();
    }
}
