use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpportunityId(pub String);

/// Ordinal scrutiny level. Ordering lives in `decision::policy`; compare through
/// `is_risk_level_at_or_above` / `is_risk_level_at_or_below` only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    Ai,
    Human,
    Hybrid,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "AI",
            Self::Human => "HUMAN",
            Self::Hybrid => "HYBRID",
        }
    }

    /// Whether an AI agent takes part in the execution.
    pub fn involves_ai(&self) -> bool {
        matches!(self, Self::Ai | Self::Hybrid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Autonomous,
    Assisted,
    ApprovalRequired,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "AUTONOMOUS",
            Self::Assisted => "ASSISTED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceMode {
    Scripted,
    Conversational,
}

impl VoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scripted => "SCRIPTED",
            Self::Conversational => "CONVERSATIONAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scripted" => Some(Self::Scripted),
            "conversational" => Some(Self::Conversational),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaUrgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl SlaUrgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voice,
    Sms,
    Email,
    Chat,
    Internal,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "voice" | "call" => Some(Self::Voice),
            "sms" | "text" => Some(Self::Sms),
            "email" => Some(Self::Email),
            "chat" | "whatsapp" => Some(Self::Chat),
            "internal" | "stage_transition" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// A proposed action produced by the playbook stage engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCommand {
    pub channel: Channel,
    pub action_type: String,
    pub ai_allowed: bool,
    pub human_allowed: bool,
    pub voice_mode: Option<VoiceMode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub tenant_id: TenantId,
    pub opportunity_id: OpportunityId,
    pub stage_id: String,
    pub execution_command: Option<ExecutionCommand>,
    pub deal_value: Option<Decimal>,
    pub customer_risk_score: Option<f64>,
    pub sla_urgency: SlaUrgency,
    pub retry_count: u32,
    pub evidence_so_far: Vec<String>,
    pub playbook_version: String,
    pub correlation_id: String,
    pub requested_at: DateTime<Utc>,
}

impl DecisionContext {
    pub fn is_voice(&self) -> bool {
        self.execution_command.as_ref().is_some_and(|command| command.channel == Channel::Voice)
    }

    pub fn has_evidence_tag(&self, tags: &[String]) -> bool {
        self.evidence_so_far
            .iter()
            .any(|evidence| tags.iter().any(|tag| tag.eq_ignore_ascii_case(evidence)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: RiskLevel,
    pub risk_factors: Vec<String>,
    pub mitigation_required: bool,
    pub recommended_actions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorCapability {
    pub actor_type: ActorType,
    pub can_execute: bool,
    pub confidence: f64,
    pub constraints: Vec<String>,
    pub risk_factors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub allowed: bool,
    pub reason: String,
    pub actor: ActorType,
    pub mode: ExecutionMode,
    pub voice_mode: Option<VoiceMode>,
    pub escalation_required: bool,
    pub execution_constraints: Vec<String>,
    pub risk_level: RiskLevel,
    pub decided_at: DateTime<Utc>,
    pub correlation_id: String,
    pub engine_version: String,
}
