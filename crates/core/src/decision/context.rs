use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::decision::{
    Channel, DecisionContext, ExecutionCommand, OpportunityId, SlaUrgency, TenantId, VoiceMode,
};

/// Loosely-typed request payload as it arrives from callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDecisionInput {
    pub tenant_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub stage_id: Option<String>,
    pub execution_command: Option<RawExecutionCommand>,
    pub deal_value: Option<Decimal>,
    pub customer_risk_score: Option<f64>,
    pub sla_urgency: Option<String>,
    pub retry_count: Option<i64>,
    pub evidence_so_far: Option<Vec<String>>,
    pub playbook_version: Option<String>,
    pub correlation_id: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExecutionCommand {
    pub channel: Option<String>,
    pub action_type: Option<String>,
    pub ai_allowed: Option<bool>,
    pub human_allowed: Option<bool>,
    pub voice_mode: Option<String>,
}

impl RawDecisionInput {
    pub fn new(
        tenant_id: impl Into<String>,
        opportunity_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            opportunity_id: Some(opportunity_id.into()),
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: RawExecutionCommand) -> Self {
        self.execution_command = Some(command);
        self
    }

    pub fn with_deal_value(mut self, deal_value: Decimal) -> Self {
        self.deal_value = Some(deal_value);
        self
    }

    pub fn with_customer_risk(mut self, score: f64) -> Self {
        self.customer_risk_score = Some(score);
        self
    }

    pub fn with_sla(mut self, urgency: impl Into<String>) -> Self {
        self.sla_urgency = Some(urgency.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: i64) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_evidence(mut self, tag: impl Into<String>) -> Self {
        self.evidence_so_far.get_or_insert_with(Vec::new).push(tag.into());
        self
    }
}

impl RawExecutionCommand {
    pub fn new(channel: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            action_type: Some(action_type.into()),
            ai_allowed: Some(true),
            human_allowed: Some(true),
            voice_mode: None,
        }
    }

    pub fn with_voice_mode(mut self, voice_mode: impl Into<String>) -> Self {
        self.voice_mode = Some(voice_mode.into());
        self
    }

    pub fn with_actors(mut self, ai_allowed: bool, human_allowed: bool) -> Self {
        self.ai_allowed = Some(ai_allowed);
        self.human_allowed = Some(human_allowed);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Normalizes a raw request. Never fails: gaps are filled with safe defaults and left for
/// [`validate_context`] to report.
pub fn build_context(raw: &RawDecisionInput) -> DecisionContext {
    let sla_urgency =
        raw.sla_urgency.as_deref().and_then(SlaUrgency::parse).unwrap_or_default();
    let retry_count = raw
        .retry_count
        .map(|count| u32::try_from(count.max(0)).unwrap_or(u32::MAX))
        .unwrap_or(0);
    let evidence_so_far = raw
        .evidence_so_far
        .iter()
        .flatten()
        .map(|tag| normalize_token(tag))
        .filter(|tag| !tag.is_empty())
        .collect();

    DecisionContext {
        tenant_id: TenantId(trimmed(raw.tenant_id.as_deref())),
        opportunity_id: OpportunityId(trimmed(raw.opportunity_id.as_deref())),
        stage_id: trimmed(raw.stage_id.as_deref()),
        execution_command: raw.execution_command.as_ref().and_then(build_command),
        deal_value: raw.deal_value,
        customer_risk_score: raw.customer_risk_score,
        sla_urgency,
        retry_count,
        evidence_so_far,
        playbook_version: raw
            .playbook_version
            .as_deref()
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .unwrap_or("unversioned")
            .to_string(),
        correlation_id: trimmed(raw.correlation_id.as_deref()),
        requested_at: raw.requested_at.unwrap_or_else(Utc::now),
    }
}

fn build_command(raw: &RawExecutionCommand) -> Option<ExecutionCommand> {
    let channel = raw.channel.as_deref().and_then(Channel::parse)?;
    Some(ExecutionCommand {
        channel,
        action_type: raw.action_type.as_deref().map(normalize_token).unwrap_or_default(),
        ai_allowed: raw.ai_allowed.unwrap_or(false),
        human_allowed: raw.human_allowed.unwrap_or(true),
        voice_mode: raw.voice_mode.as_deref().and_then(VoiceMode::parse),
    })
}

pub fn validate_context(context: &DecisionContext) -> ContextValidation {
    let mut errors = Vec::new();

    if context.tenant_id.0.is_empty() {
        errors.push("tenant_id is required".to_string());
    }
    if context.opportunity_id.0.is_empty() {
        errors.push("opportunity_id is required".to_string());
    }
    if context.correlation_id.is_empty() {
        errors.push("correlation_id is required".to_string());
    }
    match &context.execution_command {
        None => errors.push(
            "execution_command is required and must name a known channel".to_string(),
        ),
        Some(command) if command.action_type.is_empty() => {
            errors.push("execution_command.action_type is required".to_string());
        }
        Some(_) => {}
    }
    if let Some(score) = context.customer_risk_score {
        if !(0.0..=1.0).contains(&score) {
            errors.push(format!("customer_risk_score must be within 0.0..=1.0, got {score}"));
        }
    }
    if let Some(deal_value) = context.deal_value {
        if deal_value < Decimal::ZERO {
            errors.push(format!("deal_value must not be negative, got {deal_value}"));
        }
    }

    ContextValidation { valid: errors.is_empty(), errors }
}

fn trimmed(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

fn normalize_token(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{build_context, validate_context, RawDecisionInput, RawExecutionCommand};
    use crate::domain::decision::{Channel, SlaUrgency, VoiceMode};

    #[test]
    fn missing_optional_fields_get_safe_defaults() {
        let raw = RawDecisionInput::new("tenant-1", "opp-1", "corr-1")
            .with_command(RawExecutionCommand::new("sms", "Follow Up"));
        let context = build_context(&raw);

        assert_eq!(context.retry_count, 0);
        assert_eq!(context.sla_urgency, SlaUrgency::Normal);
        assert!(context.evidence_so_far.is_empty());
        assert_eq!(context.playbook_version, "unversioned");
        let command = context.execution_command.as_ref().expect("command");
        assert_eq!(command.channel, Channel::Sms);
        assert_eq!(command.action_type, "follow_up");
        assert!(validate_context(&context).valid);
    }

    #[test]
    fn unknown_sla_and_negative_retry_are_normalized() {
        let raw = RawDecisionInput::new("tenant-1", "opp-1", "corr-1")
            .with_command(RawExecutionCommand::new("voice", "qualify").with_voice_mode("Scripted"))
            .with_sla("whenever")
            .with_retry_count(-4);
        let context = build_context(&raw);

        assert_eq!(context.sla_urgency, SlaUrgency::Normal);
        assert_eq!(context.retry_count, 0);
        assert_eq!(
            context.execution_command.and_then(|command| command.voice_mode),
            Some(VoiceMode::Scripted)
        );
    }

    #[test]
    fn unrecognised_channel_is_reported_by_validation() {
        let raw = RawDecisionInput::new("tenant-1", "opp-1", "corr-1")
            .with_command(RawExecutionCommand::new("carrier_pigeon", "follow_up"));
        let context = build_context(&raw);

        assert!(context.execution_command.is_none());
        let validation = validate_context(&context);
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|error| error.contains("execution_command")));
    }

    #[test]
    fn validation_reports_every_violation() {
        let raw = RawDecisionInput::default().with_customer_risk(1.4).with_deal_value(Decimal::new(-5, 0));
        let validation = validate_context(&build_context(&raw));

        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 6);
        assert!(validation.errors.iter().any(|error| error.starts_with("tenant_id")));
        assert!(validation.errors.iter().any(|error| error.starts_with("customer_risk_score")));
        assert!(validation.errors.iter().any(|error| error.starts_with("deal_value")));
    }

    #[test]
    fn raw_input_deserializes_from_snake_case_json() {
        let raw: RawDecisionInput = serde_json::from_str(
            r#"{
                "tenant_id": "t-9",
                "opportunity_id": "o-9",
                "correlation_id": "c-9",
                "deal_value": "1250.50",
                "retry_count": 2,
                "evidence_so_far": ["Price Objection"],
                "execution_command": {"channel": "email", "action_type": "send_quote", "ai_allowed": true}
            }"#,
        )
        .expect("raw input parses");
        let context = build_context(&raw);

        assert_eq!(context.deal_value, Some(Decimal::new(125_050, 2)));
        assert_eq!(context.retry_count, 2);
        assert_eq!(context.evidence_so_far, vec!["price_objection".to_string()]);
        let command = context.execution_command.expect("command");
        assert!(command.ai_allowed);
        assert!(command.human_allowed);
    }
}
