//! SQLite implementation of the resource ledger repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{LedgerEntry, ResourceSpec};
use crate::domain::ports::LedgerRepository;
use crate::infrastructure::database::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `LedgerRepository` using sqlx.
pub struct LedgerRepositoryImpl {
    pool: SqlitePool,
}

impl LedgerRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> DomainResult<LedgerEntry> {
        Ok(LedgerEntry {
            allocation_id: Uuid::parse_str(row.get::<String, _>("allocation_id").as_str())
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            agent_id: row.get("agent_id"),
            task_id: row
                .get::<Option<String>, _>("task_id")
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok()),
            reserved: ResourceSpec {
                cpu_cores: row.get::<i64, _>("cpu_cores") as u32,
                memory_mb: row.get::<i64, _>("memory_mb") as u64,
                disk_mb: row.get::<i64, _>("disk_mb") as u64,
                network_mbps: row.get::<i64, _>("network_mbps") as u64,
            },
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl LedgerRepository for LedgerRepositoryImpl {
    async fn insert(&self, entry: &LedgerEntry) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO ledger (
                allocation_id, agent_id, task_id, cpu_cores, memory_mb,
                disk_mb, network_mbps, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.allocation_id.to_string())
        .bind(&entry.agent_id)
        .bind(entry.task_id.map(|id| id.to_string()))
        .bind(i64::from(entry.reserved.cpu_cores))
        .bind(entry.reserved.memory_mb as i64)
        .bind(entry.reserved.disk_mb as i64)
        .bind(entry.reserved.network_mbps as i64)
        .bind(format_datetime(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, allocation_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM ledger WHERE allocation_id = ?")
            .bind(allocation_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> DomainResult<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT * FROM ledger ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}
