use std::str::FromStr;

use neuronx_core::authority::{approval_requirement, escalation_path};
use neuronx_core::domain::decision::{Channel, RiskLevel, VoiceMode};
use neuronx_core::domain::org::ActionContext;
use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{to_data, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct ApprovalArgs {
    pub action: String,
    pub risk: String,
    pub deal_value: Option<String>,
    pub channel: Option<String>,
    pub voice_mode: Option<String>,
}

pub fn run(args: &ApprovalArgs) -> CommandResult {
    let context = match action_context(args) {
        Ok(context) => context,
        Err(message) => return CommandResult::failure("approval", "invalid_argument", message, 2),
    };

    let requirement = approval_requirement(&context);
    let approvers = requirement
        .required_capabilities
        .iter()
        .map(|capability| (capability.as_str(), escalation_path(*capability)))
        .collect::<std::collections::BTreeMap<_, _>>();

    CommandResult::success_with(
        "approval",
        requirement.reason.clone(),
        Some(json!({
            "context": to_data(&context),
            "requirement": to_data(&requirement),
            "approvers_by_capability": to_data(&approvers),
        })),
    )
}

fn action_context(args: &ApprovalArgs) -> Result<ActionContext, String> {
    let risk = RiskLevel::parse(&args.risk).ok_or_else(|| {
        format!("unknown risk level `{}` (expected LOW|MEDIUM|HIGH|CRITICAL)", args.risk)
    })?;
    let mut context = ActionContext::new(args.action.trim(), risk);

    if let Some(value) = &args.deal_value {
        let deal_value = Decimal::from_str(value.trim())
            .map_err(|error| format!("invalid deal value `{value}`: {error}"))?;
        context = context.with_deal_value(deal_value);
    }
    if let Some(value) = &args.channel {
        context.channel =
            Some(Channel::parse(value).ok_or_else(|| format!("unknown channel `{value}`"))?);
    }
    if let Some(value) = &args.voice_mode {
        let mode = VoiceMode::parse(value).ok_or_else(|| format!("unknown voice mode `{value}`"))?;
        context = context.with_voice(mode);
    }

    Ok(context)
}
