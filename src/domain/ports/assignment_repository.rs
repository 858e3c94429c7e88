//! Assignment repository port.
//!
//! The `assignments` collection, with secondary lookups by agent, by task,
//! and by active status.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::Assignment;

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Insert a new assignment. Fails on duplicate id.
    async fn insert(&self, assignment: &Assignment) -> DomainResult<()>;

    /// Get an assignment by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Assignment>>;

    /// Replace an existing assignment.
    async fn update(&self, assignment: &Assignment) -> DomainResult<()>;

    /// The single active assignment for a task, if any.
    async fn get_active_for_task(&self, task_id: Uuid) -> DomainResult<Option<Assignment>>;

    /// Every active assignment.
    async fn list_active(&self) -> DomainResult<Vec<Assignment>>;

    /// Active assignments held by one agent.
    async fn list_active_by_agent(&self, agent_id: &str) -> DomainResult<Vec<Assignment>>;

    /// Full attempt history of a task, newest first.
    async fn list_by_task(&self, task_id: Uuid) -> DomainResult<Vec<Assignment>>;
}
