use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::decision::{Channel, RiskLevel, TenantId, VoiceMode};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    EnterpriseAdmin,
    AgencyAdmin,
    TeamLead,
    Operator,
    Auditor,
    Viewer,
}

impl OrgRole {
    pub const ALL: [OrgRole; 6] = [
        Self::EnterpriseAdmin,
        Self::AgencyAdmin,
        Self::TeamLead,
        Self::Operator,
        Self::Auditor,
        Self::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnterpriseAdmin => "ENTERPRISE_ADMIN",
            Self::AgencyAdmin => "AGENCY_ADMIN",
            Self::TeamLead => "TEAM_LEAD",
            Self::Operator => "OPERATOR",
            Self::Auditor => "AUDITOR",
            Self::Viewer => "VIEWER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "enterprise_admin" => Some(Self::EnterpriseAdmin),
            "agency_admin" => Some(Self::AgencyAdmin),
            "team_lead" => Some(Self::TeamLead),
            "operator" => Some(Self::Operator),
            "auditor" => Some(Self::Auditor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Authority rank; higher outranks lower.
    pub fn rank(&self) -> u8 {
        match self {
            Self::EnterpriseAdmin => 5,
            Self::AgencyAdmin => 4,
            Self::TeamLead => 3,
            Self::Operator => 2,
            Self::Auditor => 1,
            Self::Viewer => 0,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::EnterpriseAdmin => 0,
            Self::AgencyAdmin => 1,
            Self::TeamLead => 2,
            Self::Operator => 3,
            Self::Auditor => 4,
            Self::Viewer => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
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
    ManageEnterpriseSettings,
    ManageRoleAssignments,
    ManageDecisionPolicy,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Self::ViewDecisions,
        Self::ViewAuditLog,
        Self::AssistExecution,
        Self::EscalateExecution,
        Self::ApproveLowRiskExecution,
        Self::ApproveHighRiskExecution,
        Self::OverrideDecision,
        Self::ManageIntegrationTokens,
        Self::ManageTeamMembers,
        Self::ManageAgencySettings,
        Self::ManageEnterpriseSettings,
        Self::ManageRoleAssignments,
        Self::ManageDecisionPolicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewDecisions => "view_decisions",
            Self::ViewAuditLog => "view_audit_log",
            Self::AssistExecution => "assist_execution",
            Self::EscalateExecution => "escalate_execution",
            Self::ApproveLowRiskExecution => "approve_low_risk_execution",
            Self::ApproveHighRiskExecution => "approve_high_risk_execution",
            Self::OverrideDecision => "override_decision",
            Self::ManageIntegrationTokens => "manage_integration_tokens",
            Self::ManageTeamMembers => "manage_team_members",
            Self::ManageAgencySettings => "manage_agency_settings",
            Self::ManageEnterpriseSettings => "manage_enterprise_settings",
            Self::ManageRoleAssignments => "manage_role_assignments",
            Self::ManageDecisionPolicy => "manage_decision_policy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|capability| capability.as_str() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Enterprise,
    Agency,
    Team,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enterprise => "enterprise",
            Self::Agency => "agency",
            Self::Team => "team",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "enterprise" => Some(Self::Enterprise),
            "agency" => Some(Self::Agency),
            "team" => Some(Self::Team),
            _ => None,
        }
    }
}

/// Grants a member a role within one org scope. Soft-revoked through `revoked_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: RoleAssignmentId,
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    pub role: OrgRole,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub required: bool,
    pub required_capabilities: Vec<Capability>,
    pub reason: String,
    pub escalation_role: Option<OrgRole>,
}

/// Input to the approval chain. `action_type` is free text from the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub action_type: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub deal_value: Option<Decimal>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub voice_mode: Option<VoiceMode>,
}

impl ActionContext {
    pub fn new(action_type: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            action_type: action_type.into(),
            risk_level,
            deal_value: None,
            channel: None,
            voice_mode: None,
        }
    }

    pub fn with_deal_value(mut self, deal_value: Decimal) -> Self {
        self.deal_value = Some(deal_value);
        self
    }

    pub fn with_voice(mut self, voice_mode: VoiceMode) -> Self {
        self.channel = Some(Channel::Voice);
        self.voice_mode = Some(voice_mode);
        self
    }
}
