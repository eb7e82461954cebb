use sqlx::Row;

use neuronx_core::audit::DecisionAuditRecord;
use neuronx_core::decision::policy::EnforcementMode;
use neuronx_core::domain::decision::{DecisionResult, OpportunityId, TenantId};

use super::{check_chain_link, parse_timestamp, DecisionAuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDecisionAuditRepository {
    pool: DbPool,
}

impl SqlDecisionAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT record_id, tenant_id, opportunity_id, correlation_id,
            enforcement_mode, policy_version, result_json, prev_hash, record_hash, recorded_at
     FROM decision_audit";

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DecisionAuditRecord, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let record_id: String = row.try_get("record_id").map_err(decode)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(decode)?;
    let opportunity_id: String = row.try_get("opportunity_id").map_err(decode)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode)?;
    let enforcement_mode: String = row.try_get("enforcement_mode").map_err(decode)?;
    let policy_version: String = row.try_get("policy_version").map_err(decode)?;
    let result_json: String = row.try_get("result_json").map_err(decode)?;
    let prev_hash: Option<String> = row.try_get("prev_hash").map_err(decode)?;
    let record_hash: String = row.try_get("record_hash").map_err(decode)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(decode)?;

    let enforcement_mode = EnforcementMode::parse(&enforcement_mode).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown enforcement mode `{enforcement_mode}`"))
    })?;
    let result: DecisionResult = serde_json::from_str(&result_json)
        .map_err(|e| RepositoryError::Decode(format!("decision result json: {e}")))?;

    Ok(DecisionAuditRecord {
        record_id,
        tenant_id: TenantId(tenant_id),
        opportunity_id: OpportunityId(opportunity_id),
        correlation_id,
        enforcement_mode,
        policy_version,
        result,
        prev_hash,
        record_hash,
        recorded_at: parse_timestamp(&recorded_at)?,
    })
}

#[async_trait::async_trait]
impl DecisionAuditRepository for SqlDecisionAuditRepository {
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError> {
        let result_json = serde_json::to_string(&record.result)
            .map_err(|e| RepositoryError::Decode(format!("decision result json: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let latest_hash: Option<String> = sqlx::query(
            "SELECT record_hash FROM decision_audit WHERE tenant_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(&record.tenant_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get::<String, _>("record_hash"))
        .transpose()?;

        check_chain_link(&record, latest_hash)?;

        sqlx::query(
            "INSERT INTO decision_audit (record_id, tenant_id, opportunity_id, correlation_id,
                                         enforcement_mode, policy_version, result_json,
                                         prev_hash, record_hash, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.record_id)
        .bind(&record.tenant_id.0)
        .bind(&record.opportunity_id.0)
        .bind(&record.correlation_id)
        .bind(record.enforcement_mode.as_str())
        .bind(&record.policy_version)
        .bind(result_json)
        .bind(&record.prev_hash)
        .bind(&record.record_hash)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionAuditRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ? ORDER BY seq DESC LIMIT 1"
        ))
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE tenant_id = ? ORDER BY seq"))
            .bind(&tenant_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_for_opportunity(
        &self,
        tenant_id: &TenantId,
        opportunity_id: &OpportunityId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ? AND opportunity_id = ? ORDER BY seq"
        ))
        .bind(&tenant_id.0)
        .bind(&opportunity_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
