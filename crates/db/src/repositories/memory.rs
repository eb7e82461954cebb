use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use neuronx_core::audit::DecisionAuditRecord;
use neuronx_core::domain::decision::{OpportunityId, TenantId};
use neuronx_core::domain::org::{MemberId, RoleAssignment, RoleAssignmentId};

use super::{check_chain_link, DecisionAuditRepository, RepositoryError, RoleAssignmentRepository};

#[derive(Default)]
pub struct InMemoryRoleAssignmentRepository {
    assignments: RwLock<HashMap<String, RoleAssignment>>,
}

#[async_trait::async_trait]
impl RoleAssignmentRepository for InMemoryRoleAssignmentRepository {
    async fn find_by_id(
        &self,
        id: &RoleAssignmentId,
    ) -> Result<Option<RoleAssignment>, RepositoryError> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(&id.0).cloned())
    }

    async fn list_for_member(
        &self,
        tenant_id: &TenantId,
        member_id: &MemberId,
    ) -> Result<Vec<RoleAssignment>, RepositoryError> {
        let assignments = self.assignments.read().await;
        let mut listed: Vec<RoleAssignment> = assignments
            .values()
            .filter(|row| row.tenant_id == *tenant_id && row.member_id == *member_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(listed)
    }

    async fn save(&self, mut assignment: RoleAssignment) -> Result<(), RepositoryError> {
        let mut assignments = self.assignments.write().await;
        if let Some(existing) = assignments.get(&assignment.id.0) {
            if existing.revoked_at.is_some() {
                assignment.revoked_at = existing.revoked_at;
            }
        }
        assignments.insert(assignment.id.0.clone(), assignment);
        Ok(())
    }

    async fn revoke(
        &self,
        id: &RoleAssignmentId,
        revoked_at: DateTime<Utc>,
    ) -> Result<Option<RoleAssignment>, RepositoryError> {
        let mut assignments = self.assignments.write().await;
        Ok(assignments.get_mut(&id.0).map(|row| {
            if row.revoked_at.is_none() {
                row.revoked_at = Some(revoked_at);
            }
            row.clone()
        }))
    }
}

#[derive(Default)]
pub struct InMemoryDecisionAuditRepository {
    records: RwLock<Vec<DecisionAuditRecord>>,
}

#[async_trait::async_trait]
impl DecisionAuditRepository for InMemoryDecisionAuditRepository {
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let latest_hash = records
            .iter()
            .rev()
            .find(|existing| existing.tenant_id == record.tenant_id)
            .map(|existing| existing.record_hash.clone());
        check_chain_link(&record, latest_hash)?;
        records.push(record);
        Ok(())
    }

    async fn latest_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionAuditRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().find(|record| record.tenant_id == *tenant_id).cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| record.tenant_id == *tenant_id).cloned().collect())
    }

    async fn list_for_opportunity(
        &self,
        tenant_id: &TenantId,
        opportunity_id: &OpportunityId,
    ) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| {
                record.tenant_id == *tenant_id && record.opportunity_id == *opportunity_id
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use neuronx_core::audit::DecisionAuditRecord;
    use neuronx_core::decision::policy::EnforcementMode;
    use neuronx_core::domain::decision::{
        ActorType, DecisionResult, ExecutionMode, OpportunityId, RiskLevel, TenantId,
    };
    use neuronx_core::domain::org::{
        MemberId, OrgRole, RoleAssignment, RoleAssignmentId, ScopeType,
    };

    use crate::repositories::{
        DecisionAuditRepository, InMemoryDecisionAuditRepository,
        InMemoryRoleAssignmentRepository, RepositoryError, RoleAssignmentRepository,
    };

    fn assignment(id: &str) -> RoleAssignment {
        RoleAssignment {
            id: RoleAssignmentId(id.to_string()),
            tenant_id: TenantId("tenant-1".to_string()),
            member_id: MemberId("member-1".to_string()),
            role: OrgRole::Operator,
            scope_type: ScopeType::Team,
            scope_id: "team-1".to_string(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn in_memory_role_assignment_revocation_sticks() {
        let repo = InMemoryRoleAssignmentRepository::default();
        let row = assignment("ra-1");
        repo.save(row.clone()).await.expect("save");

        let first_at = Utc::now() - Duration::minutes(1);
        repo.revoke(&row.id, first_at).await.expect("revoke");
        repo.revoke(&row.id, Utc::now()).await.expect("revoke again");
        repo.save(row.clone()).await.expect("re-save");

        let found = repo.find_by_id(&row.id).await.expect("find").expect("exists");
        assert_eq!(found.revoked_at, Some(first_at));

        let listed = repo
            .list_for_member(&row.tenant_id, &row.member_id)
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(
            repo.revoke(&RoleAssignmentId("missing".to_string()), Utc::now())
                .await
                .expect("revoke missing"),
            None
        );
    }

    #[tokio::test]
    async fn in_memory_audit_enforces_chain_links() {
        let repo = InMemoryDecisionAuditRepository::default();
        let result = DecisionResult {
            allowed: false,
            reason: "blocked".to_string(),
            actor: ActorType::Human,
            mode: ExecutionMode::ApprovalRequired,
            voice_mode: None,
            escalation_required: true,
            execution_constraints: Vec::new(),
            risk_level: RiskLevel::Critical,
            decided_at: Utc::now(),
            correlation_id: "corr-1".to_string(),
            engine_version: "test".to_string(),
        };
        let first = DecisionAuditRecord::chained(
            TenantId("tenant-1".to_string()),
            OpportunityId("opp-1".to_string()),
            EnforcementMode::BlockAndEscalate,
            "builtin-1",
            result.clone(),
            None,
        );
        repo.append(first.clone()).await.expect("append first");

        let second = DecisionAuditRecord::chained(
            TenantId("tenant-1".to_string()),
            OpportunityId("opp-1".to_string()),
            EnforcementMode::BlockAndEscalate,
            "builtin-1",
            result.clone(),
            Some(&first),
        );
        repo.append(second.clone()).await.expect("append second");

        let fork = DecisionAuditRecord::chained(
            TenantId("tenant-1".to_string()),
            OpportunityId("opp-1".to_string()),
            EnforcementMode::BlockAndEscalate,
            "builtin-1",
            result,
            Some(&first),
        );
        assert!(matches!(
            repo.append(fork).await,
            Err(RepositoryError::ChainConflict { .. })
        ));

        let tenant = TenantId("tenant-1".to_string());
        assert_eq!(repo.latest_for_tenant(&tenant).await.expect("latest"), Some(second));
        assert_eq!(
            repo.list_for_opportunity(&tenant, &OpportunityId("opp-1".to_string()))
                .await
                .expect("list")
                .len(),
            2
        );
    }
}
