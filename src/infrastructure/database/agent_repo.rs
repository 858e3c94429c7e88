//! SQLite implementation of the agent repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AgentDescriptor, AgentHealth, AgentRole, Capability, ResourceSpec};
use crate::domain::ports::AgentRepository;
use crate::infrastructure::database::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `AgentRepository` using sqlx.
pub struct AgentRepositoryImpl {
    pool: SqlitePool,
}

impl AgentRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> DomainResult<AgentDescriptor> {
        let role_str: String = row.get("role");
        let role = AgentRole::parse_str(&role_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown agent role {role_str:?}"))
        })?;
        let health_str: String = row.get("health");
        let health = AgentHealth::parse_str(&health_str).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown agent health {health_str:?}"))
        })?;
        let labels: Vec<String> =
            serde_json::from_str(row.get::<String, _>("capabilities").as_str())?;
        let capabilities: BTreeSet<Capability> = labels.into_iter().map(Capability).collect();

        Ok(AgentDescriptor {
            id: row.get("id"),
            role,
            capabilities,
            capacity: row.get::<i64, _>("capacity") as u32,
            current_load: row.get::<i64, _>("current_load") as u32,
            footprint: ResourceSpec {
                cpu_cores: row.get::<i64, _>("cpu_cores") as u32,
                memory_mb: row.get::<i64, _>("memory_mb") as u64,
                disk_mb: row.get::<i64, _>("disk_mb") as u64,
                network_mbps: row.get::<i64, _>("network_mbps") as u64,
            },
            last_heartbeat_at: parse_datetime(row.get::<String, _>("last_heartbeat_at").as_str())?,
            health,
            weight: row.get::<f64, _>("weight"),
            registered_at: parse_datetime(row.get::<String, _>("registered_at").as_str())?,
        })
    }

    fn capabilities_json(agent: &AgentDescriptor) -> DomainResult<String> {
        let labels: Vec<&str> = agent.capabilities.iter().map(Capability::as_str).collect();
        Ok(serde_json::to_string(&labels)?)
    }
}

#[async_trait]
impl AgentRepository for AgentRepositoryImpl {
    async fn try_insert(&self, agent: &AgentDescriptor) -> DomainResult<bool> {
        let capabilities = Self::capabilities_json(agent)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO agents (
                id, role, capabilities, capacity, current_load, cpu_cores,
                memory_mb, disk_mb, network_mbps, last_heartbeat_at, health,
                weight, registered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id)
        .bind(agent.role.as_str())
        .bind(&capabilities)
        .bind(i64::from(agent.capacity))
        .bind(i64::from(agent.current_load))
        .bind(i64::from(agent.footprint.cpu_cores))
        .bind(agent.footprint.memory_mb as i64)
        .bind(agent.footprint.disk_mb as i64)
        .bind(agent.footprint.network_mbps as i64)
        .bind(format_datetime(agent.last_heartbeat_at))
        .bind(agent.health.as_str())
        .bind(agent.weight)
        .bind(format_datetime(agent.registered_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> DomainResult<Option<AgentDescriptor>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn update(&self, agent: &AgentDescriptor) -> DomainResult<()> {
        let capabilities = Self::capabilities_json(agent)?;
        let result = sqlx::query(
            "UPDATE agents SET
                role = ?, capabilities = ?, capacity = ?, current_load = ?,
                cpu_cores = ?, memory_mb = ?, disk_mb = ?, network_mbps = ?,
                last_heartbeat_at = ?, health = ?, weight = ?
            WHERE id = ?",
        )
        .bind(agent.role.as_str())
        .bind(&capabilities)
        .bind(i64::from(agent.capacity))
        .bind(i64::from(agent.current_load))
        .bind(i64::from(agent.footprint.cpu_cores))
        .bind(agent.footprint.memory_mb as i64)
        .bind(agent.footprint.disk_mb as i64)
        .bind(agent.footprint.network_mbps as i64)
        .bind(format_datetime(agent.last_heartbeat_at))
        .bind(agent.health.as_str())
        .bind(agent.weight)
        .bind(&agent.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> DomainResult<Vec<AgentDescriptor>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY registered_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }
}
