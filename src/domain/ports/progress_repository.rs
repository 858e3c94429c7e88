//! Progress report repository port.
//!
//! The `progress` collection with its by-assignment secondary index.
//! Reports are append-only.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::ProgressReport;

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Append a report.
    async fn insert(&self, report: &ProgressReport) -> DomainResult<()>;

    /// Reports for one assignment, oldest first.
    async fn list_by_assignment(&self, assignment_id: Uuid) -> DomainResult<Vec<ProgressReport>>;
}
