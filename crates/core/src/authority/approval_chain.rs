//! Maps an attempted action and its risk to the approval it needs. Pure and infallible.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::capabilities::role_has_capability;
use crate::decision::policy::RISK_LEVEL_HIERARCHY;
use crate::domain::decision::{Channel, RiskLevel, VoiceMode};
use crate::domain::org::{ActionContext, ApprovalRequirement, Capability, OrgRole};

/// Deal value at or above which any action needs high-risk approval.
pub const HIGH_VALUE_APPROVAL_THRESHOLD: i64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approve,
    Assist,
    Escalate,
    RevokeToken,
}

impl ApprovalAction {
    pub const ALL: [ApprovalAction; 4] =
        [Self::Approve, Self::Assist, Self::Escalate, Self::RevokeToken];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Assist => "ASSIST",
            Self::Escalate => "ESCALATE",
            Self::RevokeToken => "REVOKE_TOKEN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "approve" | "approval" => Some(Self::Approve),
            "assist" | "assisted" => Some(Self::Assist),
            "escalate" | "escalation" => Some(Self::Escalate),
            "revoke_token" | "revoke_integration_token" => Some(Self::RevokeToken),
            _ => None,
        }
    }
}

pub fn approval_requirement(context: &ActionContext) -> ApprovalRequirement {
    let Some(action) = ApprovalAction::parse(&context.action_type) else {
        return ApprovalRequirement {
            required: false,
            required_capabilities: Vec::new(),
            reason: format!(
                "unrecognised action type `{}`; no approval chain applies",
                context.action_type.trim()
            ),
            escalation_role: None,
        };
    };

    let mut requirement = base_requirement(action, context.risk_level);

    if let Some(deal_value) =
        context.deal_value.filter(|value| *value >= Decimal::new(HIGH_VALUE_APPROVAL_THRESHOLD, 0))
    {
        upgrade_to_high_risk(
            &mut requirement,
            &format!("high deal value {deal_value} requires high-risk approval"),
        );
    }
    if context.channel == Some(Channel::Voice) && context.voice_mode == Some(VoiceMode::Conversational)
    {
        upgrade_to_high_risk(&mut requirement, "conversational voice requires high-risk approval");
    }

    requirement
}

pub fn requires_approval(context: &ActionContext) -> bool {
    approval_requirement(context).required
}

pub fn required_capabilities(context: &ActionContext) -> Vec<Capability> {
    approval_requirement(context).required_capabilities
}

pub fn approval_reason(context: &ActionContext) -> String {
    approval_requirement(context).reason
}

pub fn escalation_role(context: &ActionContext) -> Option<OrgRole> {
    approval_requirement(context).escalation_role
}

fn base_requirement(action: ApprovalAction, risk: RiskLevel) -> ApprovalRequirement {
    use Capability::{
        ApproveHighRiskExecution as High, ApproveLowRiskExecution as Low,
        AssistExecution as Assist, EscalateExecution as Escalate,
        ManageIntegrationTokens as Tokens,
    };
    use OrgRole::{AgencyAdmin, EnterpriseAdmin, TeamLead};

    let (required, capabilities, escalation): (bool, &[Capability], Option<OrgRole>) =
        match (action, risk) {
            (ApprovalAction::Approve, RiskLevel::Low) => (false, &[], None),
            (ApprovalAction::Approve, RiskLevel::Medium) => (true, &[Low], Some(TeamLead)),
            (ApprovalAction::Approve, RiskLevel::High) => (true, &[Low, High], Some(AgencyAdmin)),
            (ApprovalAction::Approve, RiskLevel::Critical) => {
                (true, &[Low, High], Some(EnterpriseAdmin))
            }

            (ApprovalAction::Assist, RiskLevel::Low) => (false, &[Assist], None),
            (ApprovalAction::Assist, RiskLevel::Medium) => (true, &[Assist], Some(TeamLead)),
            (ApprovalAction::Assist, RiskLevel::High) => (true, &[Assist, Low], Some(TeamLead)),
            (ApprovalAction::Assist, RiskLevel::Critical) => {
                (true, &[Assist, Low, High], Some(EnterpriseAdmin))
            }

            (ApprovalAction::Escalate, RiskLevel::Low | RiskLevel::Medium) => {
                (false, &[Escalate], None)
            }
            (ApprovalAction::Escalate, RiskLevel::High) => {
                (true, &[Escalate, Low], Some(TeamLead))
            }
            (ApprovalAction::Escalate, RiskLevel::Critical) => {
                (true, &[Escalate, Low, High], Some(EnterpriseAdmin))
            }

            (ApprovalAction::RevokeToken, RiskLevel::Low | RiskLevel::Medium) => {
                (true, &[Tokens], Some(AgencyAdmin))
            }
            (ApprovalAction::RevokeToken, RiskLevel::High) => {
                (true, &[Tokens, High], Some(AgencyAdmin))
            }
            (ApprovalAction::RevokeToken, RiskLevel::Critical) => {
                (true, &[Tokens, High], Some(EnterpriseAdmin))
            }
        };

    let reason = if required {
        format!("{} at {} risk requires approval", action.as_str(), risk.as_str())
    } else {
        format!("{} at {} risk needs no approval", action.as_str(), risk.as_str())
    };

    ApprovalRequirement {
        required,
        required_capabilities: capabilities.to_vec(),
        reason,
        escalation_role: escalation,
    }
}

fn upgrade_to_high_risk(requirement: &mut ApprovalRequirement, note: &str) {
    if !requirement.required_capabilities.contains(&Capability::ApproveHighRiskExecution) {
        requirement.required_capabilities.push(Capability::ApproveHighRiskExecution);
    }
    requirement.required = true;
    requirement.escalation_role = Some(match requirement.escalation_role {
        Some(role) if role.rank() >= OrgRole::AgencyAdmin.rank() => role,
        _ => OrgRole::AgencyAdmin,
    });
    requirement.reason = format!("{}; {note}", requirement.reason);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChainValidation {
    pub valid: bool,
    pub scenarios_checked: usize,
    pub failures: Vec<String>,
}

/// Runs the fixed scenario battery over every action, risk level, deal value band and
/// voice mode.
pub fn validate_approval_chain() -> ApprovalChainValidation {
    let deal_values = [None, Some(Decimal::new(5_000, 0)), Some(Decimal::new(HIGH_VALUE_APPROVAL_THRESHOLD, 0))];
    let voice_modes = [None, Some(VoiceMode::Scripted), Some(VoiceMode::Conversational)];
    let mut failures = Vec::new();
    let mut scenarios_checked = 0;

    for action in ApprovalAction::ALL {
        for deal_value in deal_values {
            for voice_mode in voice_modes {
                let mut previous: Option<ApprovalRequirement> = None;

                for risk in RISK_LEVEL_HIERARCHY {
                    let context = ActionContext {
                        action_type: action.as_str().to_string(),
                        risk_level: risk,
                        deal_value,
                        channel: voice_mode.map(|_| Channel::Voice),
                        voice_mode,
                    };
                    let label = format!(
                        "{} / {} / deal {:?} / voice {:?}",
                        action.as_str(),
                        risk.as_str(),
                        deal_value,
                        voice_mode
                    );
                    let requirement = approval_requirement(&context);
                    scenarios_checked += 1;

                    if approval_requirement(&context) != requirement {
                        failures.push(format!("{label}: result is not deterministic"));
                    }
                    check_requirement(&label, &requirement, &mut failures);
                    if let Some(previous) = &previous {
                        check_monotonic(&label, previous, &requirement, &mut failures);
                    }
                    previous = Some(requirement);
                }
            }
        }
    }

    ApprovalChainValidation { valid: failures.is_empty(), scenarios_checked, failures }
}

fn check_requirement(label: &str, requirement: &ApprovalRequirement, failures: &mut Vec<String>) {
    if requirement.required && requirement.required_capabilities.is_empty() {
        failures.push(format!("{label}: approval required without capabilities"));
    }
    if requirement.required && requirement.escalation_role.is_none() {
        failures.push(format!("{label}: approval required without an escalation role"));
    }
    let capabilities = &requirement.required_capabilities;
    for (index, capability) in capabilities.iter().enumerate() {
        if capabilities[..index].contains(capability) {
            failures.push(format!("{label}: duplicate capability {}", capability.as_str()));
        }
    }
    if let Some(role) = requirement.escalation_role {
        for capability in capabilities {
            if !role_has_capability(role, *capability) {
                failures.push(format!(
                    "{label}: escalation role {} lacks {}",
                    role.as_str(),
                    capability.as_str()
                ));
            }
        }
    }
}

fn check_monotonic(
    label: &str,
    lower: &ApprovalRequirement,
    higher: &ApprovalRequirement,
    failures: &mut Vec<String>,
) {
    if lower.required && !higher.required {
        failures.push(format!("{label}: approval dropped as risk rose"));
    }
    if let Some(missing) =
        lower.required_capabilities.iter().find(|capability| !higher.required_capabilities.contains(capability))
    {
        failures.push(format!("{label}: capability {} dropped as risk rose", missing.as_str()));
    }
    let rank = |role: Option<OrgRole>| role.map(|role| i16::from(role.rank())).unwrap_or(-1);
    if rank(higher.escalation_role) < rank(lower.escalation_role) {
        failures.push(format!("{label}: escalation role lowered as risk rose"));
    }
}
