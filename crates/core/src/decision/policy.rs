//! Versioned decision policy and the resolver seam the engine reads it through.
//!
//! Risk levels are ordinal but `RiskLevel` carries no `Ord`; every comparison in the
//! decision layer goes through [`is_risk_level_at_or_above`] and
//! [`is_risk_level_at_or_below`], which index into [`RISK_LEVEL_HIERARCHY`].

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::decision::{RiskLevel, SlaUrgency};

pub const RISK_LEVEL_HIERARCHY: [RiskLevel; 4] =
    [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical];

fn risk_index(level: RiskLevel) -> usize {
    RISK_LEVEL_HIERARCHY
        .iter()
        .position(|candidate| *candidate == level)
        .unwrap_or(RISK_LEVEL_HIERARCHY.len() - 1)
}

pub fn is_risk_level_at_or_above(level: RiskLevel, threshold: RiskLevel) -> bool {
    risk_index(level) >= risk_index(threshold)
}

pub fn is_risk_level_at_or_below(level: RiskLevel, threshold: RiskLevel) -> bool {
    risk_index(level) <= risk_index(threshold)
}

pub fn max_risk_level(left: RiskLevel, right: RiskLevel) -> RiskLevel {
    if is_risk_level_at_or_above(left, right) {
        left
    } else {
        right
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    MonitorOnly,
    #[default]
    Block,
    BlockAndEscalate,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonitorOnly => "monitor_only",
            Self::Block => "block",
            Self::BlockAndEscalate => "block_and_escalate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "monitor_only" => Some(Self::MonitorOnly),
            "block" => Some(Self::Block),
            "block_and_escalate" => Some(Self::BlockAndEscalate),
            _ => None,
        }
    }

    pub fn is_enforcing(&self) -> bool {
        !matches!(self, Self::MonitorOnly)
    }

    /// Used whenever the effective mode cannot be determined.
    pub fn most_restrictive() -> Self {
        Self::BlockAndEscalate
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub ai_allowed_max: RiskLevel,
    pub human_required_min: RiskLevel,
    pub approval_required_min: RiskLevel,
    pub autonomous_max: RiskLevel,
    pub assisted_min: RiskLevel,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            ai_allowed_max: RiskLevel::Medium,
            human_required_min: RiskLevel::High,
            approval_required_min: RiskLevel::High,
            autonomous_max: RiskLevel::Low,
            assisted_min: RiskLevel::Medium,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealValueThresholds {
    pub medium: Decimal,
    pub high: Decimal,
    pub critical: Decimal,
}

impl Default for DealValueThresholds {
    fn default() -> Self {
        Self {
            medium: Decimal::new(10_000, 0),
            high: Decimal::new(50_000, 0),
            critical: Decimal::new(250_000, 0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerRiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for CustomerRiskThresholds {
    fn default() -> Self {
        Self { medium: 0.4, high: 0.6, critical: 0.8 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaRiskTable {
    pub low: RiskLevel,
    pub normal: RiskLevel,
    pub high: RiskLevel,
    pub critical: RiskLevel,
}

impl SlaRiskTable {
    pub fn level_for(&self, urgency: SlaUrgency) -> RiskLevel {
        match urgency {
            SlaUrgency::Low => self.low,
            SlaUrgency::Normal => self.normal,
            SlaUrgency::High => self.high,
            SlaUrgency::Critical => self.critical,
        }
    }
}

impl Default for SlaRiskTable {
    fn default() -> Self {
        Self {
            low: RiskLevel::Low,
            normal: RiskLevel::Low,
            high: RiskLevel::Medium,
            critical: RiskLevel::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    pub escalation_threshold: u32,
    pub max_retries: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self { escalation_threshold: 3, max_retries: 5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceLimits {
    pub voice_allowed_max: RiskLevel,
    pub scripted_min: RiskLevel,
    pub max_customer_risk: f64,
}

impl Default for VoiceLimits {
    fn default() -> Self {
        Self {
            voice_allowed_max: RiskLevel::Medium,
            scripted_min: RiskLevel::Medium,
            max_customer_risk: 0.8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceTags {
    pub negative: Vec<String>,
    pub critical: Vec<String>,
    pub negative_sentiment: Vec<String>,
}

impl Default for EvidenceTags {
    fn default() -> Self {
        Self {
            negative: to_strings(&[
                "objection_raised",
                "price_objection",
                "competitor_mentioned",
                "unresponsive",
                "complaint",
                "negative_sentiment",
            ]),
            critical: to_strings(&[
                "legal_threat",
                "do_not_contact",
                "fraud_suspected",
                "regulatory_complaint",
            ]),
            negative_sentiment: to_strings(&[
                "negative_sentiment",
                "angry",
                "frustrated",
                "complaint",
            ]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyToggles {
    pub hybrid_always_assisted: bool,
    pub critical_risk_always_escalates: bool,
    pub sla_critical_always_escalates: bool,
}

impl Default for PolicyToggles {
    fn default() -> Self {
        Self {
            hybrid_always_assisted: true,
            critical_risk_always_escalates: true,
            sla_critical_always_escalates: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    pub version: String,
    pub enforcement_mode: EnforcementMode,
    pub risk_thresholds: RiskThresholds,
    pub deal_value: DealValueThresholds,
    pub customer_risk: CustomerRiskThresholds,
    pub sla_risk: SlaRiskTable,
    pub retry: RetryLimits,
    pub voice: VoiceLimits,
    pub evidence: EvidenceTags,
    pub sensitive_action_types: Vec<String>,
    pub toggles: PolicyToggles,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            version: "builtin-1".to_string(),
            enforcement_mode: EnforcementMode::default(),
            risk_thresholds: RiskThresholds::default(),
            deal_value: DealValueThresholds::default(),
            customer_risk: CustomerRiskThresholds::default(),
            sla_risk: SlaRiskTable::default(),
            retry: RetryLimits::default(),
            voice: VoiceLimits::default(),
            evidence: EvidenceTags::default(),
            sensitive_action_types: to_strings(&[
                "negotiation",
                "pricing",
                "contract",
                "payment",
                "cancellation",
            ]),
            toggles: PolicyToggles::default(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("could not read policy document `{path}`: {message}")]
    Read { path: String, message: String },
    #[error("could not parse policy document: {0}")]
    Parse(String),
    #[error("policy validation failed: {0}")]
    Invalid(String),
    #[error("policy snapshot unavailable: {0}")]
    Unavailable(String),
}

impl DecisionPolicy {
    /// Parses a partial TOML document over the built-in defaults and validates it.
    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        let policy = toml::from_str::<Self>(raw).map_err(|error| PolicyError::Parse(error.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, PolicyError> {
        let raw = fs::read_to_string(path).map_err(|error| PolicyError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_enforcement_mode(mut self, mode: EnforcementMode) -> Self {
        self.enforcement_mode = mode;
        self
    }

    pub fn is_sensitive_action(&self, action_type: &str) -> bool {
        self.sensitive_action_types.iter().any(|sensitive| sensitive.eq_ignore_ascii_case(action_type))
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError::Invalid("version must not be empty".to_string()));
        }

        let thresholds = &self.risk_thresholds;
        if is_risk_level_at_or_above(thresholds.ai_allowed_max, thresholds.human_required_min) {
            return Err(PolicyError::Invalid(
                "risk_thresholds.ai_allowed_max must be below human_required_min".to_string(),
            ));
        }
        if is_risk_level_at_or_above(thresholds.autonomous_max, thresholds.assisted_min) {
            return Err(PolicyError::Invalid(
                "risk_thresholds.autonomous_max must be below assisted_min".to_string(),
            ));
        }
        if !is_risk_level_at_or_below(thresholds.assisted_min, thresholds.approval_required_min) {
            return Err(PolicyError::Invalid(
                "risk_thresholds.assisted_min must not exceed approval_required_min".to_string(),
            ));
        }
        if is_risk_level_at_or_above(thresholds.ai_allowed_max, RiskLevel::Critical) {
            return Err(PolicyError::Invalid(
                "risk_thresholds.ai_allowed_max must be below CRITICAL".to_string(),
            ));
        }

        let deal = &self.deal_value;
        if deal.medium <= Decimal::ZERO || deal.medium > deal.high || deal.high > deal.critical {
            return Err(PolicyError::Invalid(
                "deal_value thresholds must be positive and ordered medium <= high <= critical"
                    .to_string(),
            ));
        }

        let customer = &self.customer_risk;
        let in_unit_range = |value: f64| (0.0..=1.0).contains(&value);
        if !(in_unit_range(customer.medium) && in_unit_range(customer.high) && in_unit_range(customer.critical))
            || customer.medium > customer.high
            || customer.high > customer.critical
        {
            return Err(PolicyError::Invalid(
                "customer_risk thresholds must lie in 0.0..=1.0 and be ordered medium <= high <= critical"
                    .to_string(),
            ));
        }
        if !in_unit_range(self.voice.max_customer_risk) {
            return Err(PolicyError::Invalid(
                "voice.max_customer_risk must lie in 0.0..=1.0".to_string(),
            ));
        }

        if self.retry.escalation_threshold == 0 || self.retry.escalation_threshold > self.retry.max_retries {
            return Err(PolicyError::Invalid(
                "retry.escalation_threshold must be at least 1 and not exceed max_retries".to_string(),
            ));
        }

        Ok(())
    }
}

/// Source of policy snapshots. Implementations must hand out a consistent,
/// fully-populated policy per call.
pub trait DecisionPolicyResolver: Send + Sync {
    fn snapshot(&self) -> Result<Arc<DecisionPolicy>, PolicyError>;
}

impl<T: DecisionPolicyResolver + ?Sized> DecisionPolicyResolver for Arc<T> {
    fn snapshot(&self) -> Result<Arc<DecisionPolicy>, PolicyError> {
        (**self).snapshot()
    }
}

#[derive(Clone, Debug)]
pub struct StaticPolicyResolver {
    policy: Arc<DecisionPolicy>,
}

impl StaticPolicyResolver {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy: Arc::new(policy) }
    }
}

impl Default for StaticPolicyResolver {
    fn default() -> Self {
        Self::new(DecisionPolicy::default())
    }
}

impl DecisionPolicyResolver for StaticPolicyResolver {
    fn snapshot(&self) -> Result<Arc<DecisionPolicy>, PolicyError> {
        Ok(Arc::clone(&self.policy))
    }
}

/// Holds the current policy behind a lock; readers clone the `Arc` and never observe a
/// half-applied swap.
#[derive(Debug)]
pub struct SwappablePolicyResolver {
    current: RwLock<Arc<DecisionPolicy>>,
}

impl SwappablePolicyResolver {
    pub fn new(policy: DecisionPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { current: RwLock::new(Arc::new(policy)) })
    }

    /// Replaces the active policy, returning the previous snapshot. Invalid policies are
    /// rejected and the active one is kept.
    pub fn swap(&self, policy: DecisionPolicy) -> Result<Arc<DecisionPolicy>, PolicyError> {
        policy.validate()?;
        let mut guard = self
            .current
            .write()
            .map_err(|_| PolicyError::Unavailable("policy lock is poisoned".to_string()))?;
        Ok(std::mem::replace(&mut *guard, Arc::new(policy)))
    }
}

impl DecisionPolicyResolver for SwappablePolicyResolver {
    fn snapshot(&self) -> Result<Arc<DecisionPolicy>, PolicyError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| PolicyError::Unavailable("policy lock is poisoned".to_string()))
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        is_risk_level_at_or_above, is_risk_level_at_or_below, max_risk_level, DecisionPolicy,
        DecisionPolicyResolver, EnforcementMode, PolicyError, SwappablePolicyResolver,
        RISK_LEVEL_HIERARCHY,
    };
    use crate::domain::decision::RiskLevel;

    #[test]
    fn ordinal_helpers_follow_hierarchy() {
        for (i, level) in RISK_LEVEL_HIERARCHY.iter().enumerate() {
            for (j, threshold) in RISK_LEVEL_HIERARCHY.iter().enumerate() {
                assert_eq!(is_risk_level_at_or_above(*level, *threshold), i >= j);
                assert_eq!(is_risk_level_at_or_below(*level, *threshold), i <= j);
            }
        }
        assert_eq!(max_risk_level(RiskLevel::Low, RiskLevel::High), RiskLevel::High);
        assert_eq!(max_risk_level(RiskLevel::Critical, RiskLevel::Medium), RiskLevel::Critical);
    }

    #[test]
    fn default_policy_is_valid() {
        assert_eq!(DecisionPolicy::default().validate(), Ok(()));
    }

    #[test]
    fn partial_toml_document_overrides_defaults() {
        let policy = DecisionPolicy::from_toml_str(
            r#"
version = "2026.10-east"
enforcement_mode = "block_and_escalate"

[deal_value]
high = 75000

[toggles]
hybrid_always_assisted = false
"#,
        )
        .expect("policy parses");

        assert_eq!(policy.version, "2026.10-east");
        assert_eq!(policy.enforcement_mode, EnforcementMode::BlockAndEscalate);
        assert_eq!(policy.deal_value.high, Decimal::new(75_000, 0));
        assert_eq!(policy.deal_value.medium, Decimal::new(10_000, 0));
        assert!(!policy.toggles.hybrid_always_assisted);
        assert!(policy.toggles.critical_risk_always_escalates);
    }

    #[test]
    fn misordered_thresholds_are_rejected_at_load() {
        let error = DecisionPolicy::from_toml_str(
            r#"
[risk_thresholds]
autonomous_max = "HIGH"
"#,
        )
        .expect_err("autonomous above assisted must fail");
        assert!(matches!(error, PolicyError::Invalid(ref message) if message.contains("autonomous_max")));

        let error = DecisionPolicy::from_toml_str(
            r#"
[deal_value]
medium = 90000
high = 50000
"#,
        )
        .expect_err("unordered deal thresholds must fail");
        assert!(matches!(error, PolicyError::Invalid(_)));
    }

    #[test]
    fn unknown_enforcement_mode_fails_to_parse() {
        let error = DecisionPolicy::from_toml_str("enforcement_mode = \"audit\"")
            .expect_err("unknown mode");
        assert!(matches!(error, PolicyError::Parse(_)));
        assert_eq!(EnforcementMode::parse("block-and-escalate"), Some(EnforcementMode::BlockAndEscalate));
    }

    #[test]
    fn swap_rejects_invalid_policy_and_keeps_current() {
        let resolver = SwappablePolicyResolver::new(DecisionPolicy::default()).expect("resolver");

        let mut invalid = DecisionPolicy::default();
        invalid.version = String::new();
        assert!(resolver.swap(invalid).is_err());
        assert_eq!(resolver.snapshot().expect("snapshot").version, "builtin-1");

        let next = DecisionPolicy {
            version: "v2".to_string(),
            ..DecisionPolicy::default()
        }
        .with_enforcement_mode(EnforcementMode::MonitorOnly);
        let previous = resolver.swap(next).expect("swap");
        assert_eq!(previous.version, "builtin-1");

        let current = resolver.snapshot().expect("snapshot");
        assert_eq!(current.version, "v2");
        assert_eq!(current.enforcement_mode, EnforcementMode::MonitorOnly);
    }

    #[test]
    fn sensitive_action_lookup_ignores_case() {
        let policy = DecisionPolicy::default();
        assert!(policy.is_sensitive_action("Negotiation"));
        assert!(!policy.is_sensitive_action("follow_up"));
    }
}
