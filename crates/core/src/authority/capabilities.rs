//! Frozen role → capability table.

use crate::domain::org::{Capability, OrgRole};

use crate::domain::org::Capability::{
    ApproveHighRiskExecution, ApproveLowRiskExecution, AssistExecution, EscalateExecution,
    ManageAgencySettings, ManageDecisionPolicy, ManageEnterpriseSettings, ManageIntegrationTokens,
    ManageRoleAssignments, ManageTeamMembers, OverrideDecision, ViewAuditLog, ViewDecisions,
};

const ENTERPRISE_ADMIN: &[Capability] = &Capability::ALL;

const AGENCY_ADMIN: &[Capability] = &[
    ViewDecisions,
    ViewAuditLog,
    AssistExecution,
    EscalateExecution,
    ApproveLowRiskExecution,
    ApproveHighRiskExecution,
    OverrideDecision,
    ManageIntegrationTokens,
    ManageTeamMembers,
    ManageAgencySettings,
    ManageRoleAssignments,
];

const TEAM_LEAD: &[Capability] = &[
    ViewDecisions,
    ViewAuditLog,
    AssistExecution,
    EscalateExecution,
    ApproveLowRiskExecution,
    ManageTeamMembers,
];

const OPERATOR: &[Capability] = &[ViewDecisions, AssistExecution, EscalateExecution];

const AUDITOR: &[Capability] = &[ViewDecisions, ViewAuditLog];

const VIEWER: &[Capability] = &[ViewDecisions];

/// Indexed by [`OrgRole::index`].
pub const ROLE_CAPABILITIES: [&[Capability]; 6] =
    [ENTERPRISE_ADMIN, AGENCY_ADMIN, TEAM_LEAD, OPERATOR, AUDITOR, VIEWER];

pub fn capabilities_for_role(role: OrgRole) -> &'static [Capability] {
    ROLE_CAPABILITIES[role.index()]
}

pub fn role_has_capability(role: OrgRole, capability: Capability) -> bool {
    capabilities_for_role(role).contains(&capability)
}

/// Roles holding `capability`, lowest rank first.
pub fn roles_with_capability(capability: Capability) -> Vec<OrgRole> {
    let mut roles: Vec<OrgRole> =
        OrgRole::ALL.into_iter().filter(|role| role_has_capability(*role, capability)).collect();
    roles.sort_by_key(OrgRole::rank);
    roles
}

pub fn is_administrative_capability(capability: Capability) -> bool {
    matches!(
        capability,
        ManageIntegrationTokens
            | ManageTeamMembers
            | ManageAgencySettings
            | ManageEnterpriseSettings
            | ManageRoleAssignments
            | ManageDecisionPolicy
    )
}

pub fn is_execution_capability(capability: Capability) -> bool {
    matches!(
        capability,
        AssistExecution
            | EscalateExecution
            | ApproveLowRiskExecution
            | ApproveHighRiskExecution
            | OverrideDecision
    )
}

/// Roles a request can be escalated to for `capability`, cheapest to reach first.
pub fn escalation_path(capability: Capability) -> Vec<OrgRole> {
    roles_with_capability(capability)
}
