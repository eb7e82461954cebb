use serde::{Deserialize, Serialize};

use super::policy::{is_risk_level_at_or_above, is_risk_level_at_or_below, DecisionPolicy};
use super::risk::deal_value_tier;
use crate::domain::decision::{DecisionContext, RiskAssessment, RiskLevel, SlaUrgency, VoiceMode};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAllowance {
    pub allowed: bool,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceModeSelection {
    pub mode: VoiceMode,
    pub reason: String,
    pub constraints: Vec<String>,
}

pub fn is_voice_allowed(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> VoiceAllowance {
    if !context.is_voice() {
        return VoiceAllowance { allowed: true, reason: "command is not a voice command".to_string() };
    }

    let denial = if risk.overall_risk == RiskLevel::Critical {
        Some("voice is not allowed at CRITICAL risk".to_string())
    } else if !is_risk_level_at_or_below(risk.overall_risk, policy.voice.voice_allowed_max) {
        Some(format!(
            "risk {} exceeds voice maximum {}",
            risk.overall_risk.as_str(),
            policy.voice.voice_allowed_max.as_str()
        ))
    } else if context.deal_value.is_some_and(|value| value >= policy.deal_value.high) {
        Some("deal value is at or above the high-value threshold".to_string())
    } else if context.customer_risk_score.is_some_and(|score| score >= policy.voice.max_customer_risk) {
        Some("customer risk score is at or above the voice limit".to_string())
    } else if context.retry_count >= policy.retry.escalation_threshold {
        Some(format!("{} previous attempts reach the escalation threshold", context.retry_count))
    } else if context.has_evidence_tag(&policy.evidence.negative_sentiment) {
        Some("negative sentiment recorded in evidence".to_string())
    } else {
        None
    };

    match denial {
        Some(reason) => VoiceAllowance { allowed: false, reason },
        None => VoiceAllowance { allowed: true, reason: "voice within policy limits".to_string() },
    }
}

/// Chooses the voice mode for an allowed voice command. SCRIPTED wins every tie and a
/// command that asks for SCRIPTED is never upgraded.
pub fn select_voice_mode(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> VoiceModeSelection {
    let requested = context.execution_command.as_ref().and_then(|command| command.voice_mode);
    let scripted_reason = scripted_reason(context, risk, policy, requested);

    let conversational_eligible = risk.overall_risk == RiskLevel::Low
        && deal_value_tier(context.deal_value, policy) == RiskLevel::Low
        && context.retry_count == 0
        && !context.has_evidence_tag(&policy.evidence.negative)
        && !context.has_evidence_tag(&policy.evidence.negative_sentiment);

    let (mode, reason) = match scripted_reason {
        Some(reason) => (VoiceMode::Scripted, reason),
        None if conversational_eligible => {
            (VoiceMode::Conversational, "low risk first attempt with neutral evidence".to_string())
        }
        None => (VoiceMode::Scripted, "scripted by default".to_string()),
    };

    let mut constraints = Vec::new();
    if mode == VoiceMode::Scripted {
        constraints.push("use_approved_voice_script".to_string());
        if requested == Some(VoiceMode::Conversational) {
            constraints.push("voice_downgraded_to_scripted".to_string());
        }
    }

    VoiceModeSelection { mode, reason, constraints }
}

fn scripted_reason(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
    requested: Option<VoiceMode>,
) -> Option<String> {
    if requested == Some(VoiceMode::Scripted) {
        return Some("command requested scripted voice".to_string());
    }
    if is_risk_level_at_or_above(risk.overall_risk, policy.voice.scripted_min) {
        return Some(format!("risk {} requires scripted voice", risk.overall_risk.as_str()));
    }

    let medium_deal = deal_value_tier(context.deal_value, policy) == RiskLevel::Medium;
    let medium_customer = context.customer_risk_score.is_some_and(|score| {
        score >= policy.customer_risk.medium && score < policy.customer_risk.high
    });
    if (medium_deal || medium_customer) && context.retry_count > 0 {
        return Some("medium exposure on a repeated attempt".to_string());
    }
    if context.sla_urgency == SlaUrgency::Critical {
        return Some("critical sla requires scripted voice".to_string());
    }
    let action_type = context.execution_command.as_ref().map(|command| command.action_type.as_str());
    if action_type.is_some_and(|action| policy.is_sensitive_action(action)) {
        return Some("sensitive action requires scripted voice".to_string());
    }

    None
}
