use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use neuronx_core::audit::DecisionAuditRecord;
use neuronx_core::domain::decision::{OpportunityId, TenantId};
use neuronx_core::domain::org::{MemberId, RoleAssignment, RoleAssignmentId};

pub mod decision_audit;
pub mod memory;
pub mod role_assignment;

pub use decision_audit::SqlDecisionAuditRepository;
pub use memory::{InMemoryDecisionAuditRepository, InMemoryRoleAssignmentRepository};
pub use role_assignment::SqlRoleAssignmentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(
        "audit chain conflict for tenant `{tenant_id}`: expected previous hash {}, got {}",
        .expected.as_deref().unwrap_or("<none>"),
        .actual.as_deref().unwrap_or("<none>")
    )]
    ChainConflict { tenant_id: String, expected: Option<String>, actual: Option<String> },
}

#[async_trait]
pub trait RoleAssignmentRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &RoleAssignmentId,
    ) -> Result<Option<RoleAssignment>, RepositoryError>;

    /// Every assignment of the member in the tenant, revoked ones included, oldest first.
    async fn list_for_member(
        &self,
        tenant_id: &TenantId,
        member_id: &MemberId,
    ) -> Result<Vec<RoleAssignment>, RepositoryError>;

    async fn save(&self, assignment: RoleAssignment) -> Result<(), RepositoryError>;

    /// Marks the assignment revoked. A second revocation keeps the first timestamp.
    /// Returns `None` when no assignment has the id.
    async fn revoke(
        &self,
        id: &RoleAssignmentId,
        revoked_at: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>, RepositoryError>;
}

/// Append-only store for hash-chained decision records.
#[async_trait]
pub trait DecisionAuditRepository: Send + Sync {
    /// Appends `record` if its `prev_hash` matches the tenant's latest record hash.
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError>;

    async fn latest_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionAuditRecord>, RepositoryError>;

    /// Records of the tenant in append order.
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError>;

    async fn list_for_opportunity(
        &self,
        tenant_id: &TenantId,
        opportunity_id: &OpportunityId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError>;
}

pub(crate) fn check_chain_link(
    record: &DecisionAuditRecord,
    latest_hash: Option<String>,
) -> Result<(), RepositoryError> {
    if record.prev_hash == latest_hash {
        return Ok(());
    }
    Err(RepositoryError::ChainConflict {
        tenant_id: record.tenant_id.0.clone(),
        expected: latest_hash,
        actual: record.prev_hash.clone(),
    })
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{value}`: {e}")))
}
