use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::capabilities::{capabilities_for_role, role_has_capability};
use crate::domain::decision::TenantId;
use crate::domain::org::{ApprovalRequirement, Capability, MemberId, OrgRole, RoleAssignment, ScopeType};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthorityError {
    #[error(
        "member `{}` lacks required capabilities: {}",
        .member_id.0,
        .missing.iter().map(Capability::as_str).collect::<Vec<_>>().join(", ")
    )]
    InsufficientCapabilities {
        member_id: MemberId,
        missing: Vec<Capability>,
        escalation_path: Vec<OrgRole>,
    },
    #[error("member `{}` cannot act on {} `{scope_id}`", .member_id.0, .scope_type.as_str())]
    OrgScope { member_id: MemberId, scope_type: ScopeType, scope_id: String },
}

/// Authority of one member within one tenant, built fresh for every check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityContext {
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    pub user_id: String,
    /// All of the member's assignments in the tenant, revoked ones included.
    pub role_assignments: Vec<RoleAssignment>,
    pub resolved_capabilities: BTreeSet<Capability>,
}

impl AuthorityContext {
    pub fn new(
        tenant_id: TenantId,
        member_id: MemberId,
        user_id: impl Into<String>,
        assignments: impl IntoIterator<Item = RoleAssignment>,
    ) -> Self {
        let role_assignments: Vec<RoleAssignment> = assignments
            .into_iter()
            .filter(|assignment| assignment.tenant_id == tenant_id && assignment.member_id == member_id)
            .collect();
        let resolved_capabilities = resolve_capabilities(&member_id, &role_assignments);

        Self { tenant_id, member_id, user_id: user_id.into(), role_assignments, resolved_capabilities }
    }

    fn active_assignments(&self) -> impl Iterator<Item = &RoleAssignment> {
        self.role_assignments.iter().filter(|assignment| assignment.is_active())
    }
}

/// Union of capabilities over the member's active assignments. Revoked assignments
/// contribute nothing.
pub fn resolve_capabilities(member_id: &MemberId, assignments: &[RoleAssignment]) -> BTreeSet<Capability> {
    assignments
        .iter()
        .filter(|assignment| assignment.member_id == *member_id && assignment.is_active())
        .flat_map(|assignment| capabilities_for_role(assignment.role).iter().copied())
        .collect()
}

pub fn has_capability(context: &AuthorityContext, capability: Capability) -> bool {
    context.resolved_capabilities.contains(&capability)
}

pub fn assert_capability(context: &AuthorityContext, capability: Capability) -> Result<(), AuthorityError> {
    assert_capabilities(context, &[capability])
}

pub fn assert_capabilities(
    context: &AuthorityContext,
    capabilities: &[Capability],
) -> Result<(), AuthorityError> {
    let missing: Vec<Capability> = capabilities
        .iter()
        .copied()
        .filter(|capability| !has_capability(context, *capability))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let escalation_path = escalation_path_for(&missing);
    warn!(
        event_name = "authority.capability_denied",
        tenant_id = %context.tenant_id.0,
        member_id = %context.member_id.0,
        missing = %missing.iter().map(Capability::as_str).collect::<Vec<_>>().join(","),
        "member lacks required capabilities"
    );
    Err(AuthorityError::InsufficientCapabilities {
        member_id: context.member_id.clone(),
        missing,
        escalation_path,
    })
}

// TODO: let enterprise and agency assignments cover their child scopes once the resolver
// is given the org hierarchy; until then scopes match exactly.
fn can_act_on(context: &AuthorityContext, scope_type: ScopeType, scope_id: &str) -> bool {
    context
        .active_assignments()
        .any(|assignment| assignment.scope_type == scope_type && assignment.scope_id == scope_id)
}

pub fn can_act_on_team(context: &AuthorityContext, team_id: &str) -> bool {
    can_act_on(context, ScopeType::Team, team_id)
}

pub fn can_act_on_agency(context: &AuthorityContext, agency_id: &str) -> bool {
    can_act_on(context, ScopeType::Agency, agency_id)
}

pub fn can_act_on_enterprise(context: &AuthorityContext, enterprise_id: &str) -> bool {
    can_act_on(context, ScopeType::Enterprise, enterprise_id)
}

pub fn assert_scope(
    context: &AuthorityContext,
    scope_type: ScopeType,
    scope_id: &str,
) -> Result<(), AuthorityError> {
    if can_act_on(context, scope_type, scope_id) {
        return Ok(());
    }
    warn!(
        event_name = "authority.scope_denied",
        tenant_id = %context.tenant_id.0,
        member_id = %context.member_id.0,
        scope_type = scope_type.as_str(),
        scope_id = %scope_id,
        "member has no assignment in scope"
    );
    Err(AuthorityError::OrgScope {
        member_id: context.member_id.clone(),
        scope_type,
        scope_id: scope_id.to_string(),
    })
}

pub fn highest_role(context: &AuthorityContext) -> Option<OrgRole> {
    context.active_assignments().map(|assignment| assignment.role).max_by_key(OrgRole::rank)
}

/// Checks that the member can grant an approval requirement. Requirements that need no
/// approval always pass.
pub fn authorize_requirement(
    context: &AuthorityContext,
    requirement: &ApprovalRequirement,
) -> Result<(), AuthorityError> {
    if !requirement.required {
        return Ok(());
    }
    assert_capabilities(context, &requirement.required_capabilities)
}

/// Roles holding every capability in `missing`, lowest rank first.
fn escalation_path_for(missing: &[Capability]) -> Vec<OrgRole> {
    let mut roles: Vec<OrgRole> = OrgRole::ALL
        .into_iter()
        .filter(|role| missing.iter().all(|capability| role_has_capability(*role, *capability)))
        .collect();
    roles.sort_by_key(OrgRole::rank);
    roles
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::{
        assert_capability, assert_scope, authorize_requirement, can_act_on_agency,
        can_act_on_enterprise, can_act_on_team, has_capability, highest_role,
        resolve_capabilities, AuthorityContext, AuthorityError,
    };
    use crate::authority::approval_chain::approval_requirement;
    use crate::authority::capabilities::capabilities_for_role;
    use crate::domain::decision::{RiskLevel, TenantId};
    use crate::domain::org::{
        ActionContext, Capability, MemberId, OrgRole, RoleAssignment, RoleAssignmentId, ScopeType,
    };

    fn assignment(
        id: &str,
        member: &str,
        role: OrgRole,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> RoleAssignment {
        RoleAssignment {
            id: RoleAssignmentId(id.to_string()),
            tenant_id: TenantId("tenant-1".to_string()),
            member_id: MemberId(member.to_string()),
            role,
            scope_type,
            scope_id: scope_id.to_string(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    fn context(assignments: Vec<RoleAssignment>) -> AuthorityContext {
        AuthorityContext::new(
            TenantId("tenant-1".to_string()),
            MemberId("member-1".to_string()),
            "user-1",
            assignments,
        )
    }

    #[test]
    fn revoked_assignments_contribute_nothing() {
        let mut revoked = assignment("ra-1", "member-1", OrgRole::AgencyAdmin, ScopeType::Agency, "ag-1");
        revoked.revoked_at = Some(Utc::now());
        let active = assignment("ra-2", "member-1", OrgRole::Operator, ScopeType::Team, "team-1");

        let capabilities = resolve_capabilities(&MemberId("member-1".to_string()), &[revoked.clone(), active.clone()]);
        assert!(capabilities.contains(&Capability::AssistExecution));
        assert!(!capabilities.contains(&Capability::ApproveHighRiskExecution));

        let context = context(vec![revoked, active]);
        assert_eq!(context.role_assignments.len(), 2);
        assert!(!has_capability(&context, Capability::OverrideDecision));
        assert!(!can_act_on_agency(&context, "ag-1"));
        assert_eq!(highest_role(&context), Some(OrgRole::Operator));
    }

    #[test]
    fn resolution_is_union_of_active_assignments_in_any_order() {
        for member in ["member-1", "member-2"] {
            let member_id = MemberId(member.to_string());
            for active_role in OrgRole::ALL {
                for revoked_role in OrgRole::ALL {
                    let mut revoked_copy =
                        assignment("ra-r1", member, active_role, ScopeType::Team, "team-1");
                    revoked_copy.revoked_at = Some(Utc::now());
                    let mut revoked_other =
                        assignment("ra-r2", member, revoked_role, ScopeType::Agency, "ag-1");
                    revoked_other.revoked_at = Some(Utc::now());
                    let assignments = vec![
                        assignment("ra-a1", member, active_role, ScopeType::Team, "team-1"),
                        revoked_copy,
                        revoked_other,
                        assignment("ra-a2", member, OrgRole::Viewer, ScopeType::Team, "team-2"),
                        assignment("ra-o1", "member-3", OrgRole::EnterpriseAdmin, ScopeType::Enterprise, "ent-1"),
                    ];

                    let expected = assignments
                        .iter()
                        .filter(|candidate| candidate.member_id == member_id && candidate.revoked_at.is_none())
                        .flat_map(|candidate| capabilities_for_role(candidate.role).iter().copied())
                        .collect::<BTreeSet<_>>();

                    for shift in 0..assignments.len() {
                        for reversed in [false, true] {
                            let mut ordered = assignments.clone();
                            ordered.rotate_left(shift);
                            if reversed {
                                ordered.reverse();
                            }

                            assert_eq!(
                                resolve_capabilities(&member_id, &ordered),
                                expected,
                                "{member} active {active_role:?} revoked {revoked_role:?} shift {shift}"
                            );
                            let context = AuthorityContext::new(
                                TenantId("tenant-1".to_string()),
                                member_id.clone(),
                                "user-1",
                                ordered,
                            );
                            assert_eq!(context.resolved_capabilities, expected);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn other_members_and_tenants_are_ignored() {
        let mut foreign_tenant =
            assignment("ra-3", "member-1", OrgRole::EnterpriseAdmin, ScopeType::Enterprise, "ent-1");
        foreign_tenant.tenant_id = TenantId("tenant-2".to_string());
        let other_member = assignment("ra-4", "member-2", OrgRole::AgencyAdmin, ScopeType::Agency, "ag-1");

        let context = context(vec![foreign_tenant, other_member]);
        assert!(context.role_assignments.is_empty());
        assert!(context.resolved_capabilities.is_empty());
        assert_eq!(highest_role(&context), None);
    }

    #[test]
    fn missing_capability_reports_escalation_path() {
        let context = context(vec![assignment("ra-5", "member-1", OrgRole::TeamLead, ScopeType::Team, "team-1")]);

        assert_eq!(assert_capability(&context, Capability::ApproveLowRiskExecution), Ok(()));
        let error = assert_capability(&context, Capability::ApproveHighRiskExecution)
            .expect_err("team lead cannot approve high risk");
        assert_eq!(
            error,
            AuthorityError::InsufficientCapabilities {
                member_id: MemberId("member-1".to_string()),
                missing: vec![Capability::ApproveHighRiskExecution],
                escalation_path: vec![OrgRole::AgencyAdmin, OrgRole::EnterpriseAdmin],
            }
        );
        assert!(error.to_string().contains("approve_high_risk_execution"));
    }

    #[test]
    fn scope_checks_match_exactly() {
        let context = context(vec![
            assignment("ra-6", "member-1", OrgRole::AgencyAdmin, ScopeType::Agency, "ag-1"),
            assignment("ra-7", "member-1", OrgRole::Operator, ScopeType::Team, "team-9"),
        ]);

        assert!(can_act_on_agency(&context, "ag-1"));
        assert!(!can_act_on_agency(&context, "ag-2"));
        assert!(can_act_on_team(&context, "team-9"));
        assert!(!can_act_on_team(&context, "ag-1"));
        assert!(!can_act_on_enterprise(&context, "ent-1"));

        let error = assert_scope(&context, ScopeType::Enterprise, "ent-1").expect_err("no enterprise scope");
        assert!(matches!(error, AuthorityError::OrgScope { scope_type: ScopeType::Enterprise, .. }));
        assert_eq!(highest_role(&context), Some(OrgRole::AgencyAdmin));
    }

    #[test]
    fn approval_requirement_is_enforced_against_assignments() {
        let requirement = approval_requirement(&ActionContext::new("approve", RiskLevel::High));
        let lead = context(vec![assignment("ra-8", "member-1", OrgRole::TeamLead, ScopeType::Team, "team-1")]);
        let admin = context(vec![assignment("ra-9", "member-1", OrgRole::AgencyAdmin, ScopeType::Agency, "ag-1")]);

        assert!(authorize_requirement(&lead, &requirement).is_err());
        assert_eq!(authorize_requirement(&admin, &requirement), Ok(()));

        let not_required = approval_requirement(&ActionContext::new("approve", RiskLevel::Low));
        assert_eq!(authorize_requirement(&context(Vec::new()), &not_required), Ok(()));
    }

    #[test]
    fn resolution_matches_role_table_for_every_role() {
        for role in OrgRole::ALL {
            let context = context(vec![assignment("ra-x", "member-1", role, ScopeType::Team, "team-1")]);
            for capability in Capability::ALL {
                assert_eq!(
                    has_capability(&context, capability),
                    crate::authority::capabilities::role_has_capability(role, capability)
                );
            }
        }
    }
}
