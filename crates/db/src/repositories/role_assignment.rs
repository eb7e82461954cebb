use chrono::{DateTime, Utc};
use sqlx::Row;

use neuronx_core::domain::decision::TenantId;
use neuronx_core::domain::org::{MemberId, OrgRole, RoleAssignment, RoleAssignmentId, ScopeType};

use super::{parse_timestamp, RepositoryError, RoleAssignmentRepository};
use crate::DbPool;

pub struct SqlRoleAssignmentRepository {
    pool: DbPool,
}

impl SqlRoleAssignmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, tenant_id, member_id, role, scope_type, scope_id, created_at, revoked_at
     FROM role_assignment";

fn row_to_assignment(row: &sqlx::sqlite::SqliteRow) -> Result<RoleAssignment, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let id: String = row.try_get("id").map_err(decode)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(decode)?;
    let member_id: String = row.try_get("member_id").map_err(decode)?;
    let role: String = row.try_get("role").map_err(decode)?;
    let scope_type: String = row.try_get("scope_type").map_err(decode)?;
    let scope_id: String = row.try_get("scope_id").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let revoked_at: Option<String> = row.try_get("revoked_at").map_err(decode)?;

    let role = OrgRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown org role `{role}`")))?;
    let scope_type = ScopeType::parse(&scope_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown scope type `{scope_type}`")))?;

    Ok(RoleAssignment {
        id: RoleAssignmentId(id),
        tenant_id: TenantId(tenant_id),
        member_id: MemberId(member_id),
        role,
        scope_type,
        scope_id,
        created_at: parse_timestamp(&created_at)?,
        revoked_at: revoked_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[async_trait::async_trait]
impl RoleAssignmentRepository for SqlRoleAssignmentRepository {
    async fn find_by_id(
        &self,
        id: &RoleAssignmentId,
    ) -> Result<Option<RoleAssignment>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_assignment).transpose()
    }

    async fn list_for_member(
        &self,
        tenant_id: &TenantId,
        member_id: &MemberId,
    ) -> Result<Vec<RoleAssignment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ? AND member_id = ? ORDER BY created_at, id"
        ))
        .bind(&tenant_id.0)
        .bind(&member_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignment).collect()
    }

    async fn save(&self, assignment: RoleAssignment) -> Result<(), RepositoryError> {
        // revoked_at is write-once: an upsert never clears or moves it.
        sqlx::query(
            "INSERT INTO role_assignment (id, tenant_id, member_id, role, scope_type, scope_id,
                                          created_at, revoked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 role = excluded.role,
                 scope_type = excluded.scope_type,
                 scope_id = excluded.scope_id,
                 revoked_at = COALESCE(role_assignment.revoked_at, excluded.revoked_at)",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.tenant_id.0)
        .bind(&assignment.member_id.0)
        .bind(assignment.role.as_str())
        .bind(assignment.scope_type.as_str())
        .bind(&assignment.scope_id)
        .bind(assignment.created_at.to_rfc3339())
        .bind(assignment.revoked_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke(
        &self,
        id: &RoleAssignmentId,
        revoked_at: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>, RepositoryError> {
        sqlx::query(
            "UPDATE role_assignment SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        )
        .bind(revoked_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await
    }
}
