use neuronx_core::authority::{
    capabilities_for_role, is_administrative_capability, is_execution_capability,
};
use neuronx_core::domain::org::{Capability, OrgRole};
use serde_json::json;

use crate::commands::CommandResult;

pub fn run(role: &str) -> CommandResult {
    let Some(role) = OrgRole::parse(role) else {
        let known = OrgRole::ALL.iter().map(OrgRole::as_str).collect::<Vec<_>>().join("|");
        return CommandResult::failure(
            "capabilities",
            "invalid_argument",
            format!("unknown role `{role}` (expected {known})"),
            2,
        );
    };

    let capabilities = capabilities_for_role(role);
    let names = |filter: fn(Capability) -> bool| {
        capabilities
            .iter()
            .filter(|capability| filter(**capability))
            .map(Capability::as_str)
            .collect::<Vec<_>>()
    };

    CommandResult::success_with(
        "capabilities",
        format!("{} holds {} capabilities", role.as_str(), capabilities.len()),
        Some(json!({
            "role": role.as_str(),
            "rank": role.rank(),
            "capabilities": names(|_| true),
            "execution": names(is_execution_capability),
            "administrative": names(is_administrative_capability),
        })),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::run;

    #[test]
    fn operator_capabilities_are_listed() {
        let result = run("operator");
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["data"]["role"], "OPERATOR");
        assert_eq!(
            payload["data"]["capabilities"],
            serde_json::json!(["view_decisions", "assist_execution", "escalate_execution"])
        );
        assert_eq!(payload["data"]["administrative"], serde_json::json!([]));
    }

    #[test]
    fn team_lead_capabilities_are_split_by_kind() {
        let result = run("TEAM_LEAD");
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["data"]["rank"], 3);
        assert_eq!(
            payload["data"]["execution"],
            serde_json::json!(["assist_execution", "escalate_execution", "approve_low_risk_execution"])
        );
        assert_eq!(payload["data"]["administrative"], serde_json::json!(["manage_team_members"]));
    }

    #[test]
    fn unknown_role_fails() {
        let result = run("overlord");
        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("ENTERPRISE_ADMIN"));
    }
}
