use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::actor::select_actor;
use super::context::{build_context, validate_context, RawDecisionInput};
use super::merge_unique;
use super::policy::{
    is_risk_level_at_or_above, is_risk_level_at_or_below, DecisionPolicy, DecisionPolicyResolver,
    EnforcementMode, PolicyError,
};
use super::risk::{assess_risk, deal_value_tier};
use super::voice::{is_voice_allowed, select_voice_mode, VoiceAllowance};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::decision::{
    ActorCapability, ActorType, Channel, DecisionContext, DecisionResult, ExecutionMode,
    RiskAssessment, RiskLevel, SlaUrgency,
};

pub const ENGINE_VERSION: &str = concat!("neuronx-decision-engine/", env!("CARGO_PKG_VERSION"));

const FAIL_SAFE_CONSTRAINTS: [&str; 2] = ["fail_safe_human_review", "escalate_to_senior_operator"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision context is invalid: {}", .errors.join("; "))]
    InvalidContext { errors: Vec<String> },
    #[error("decision result violates invariants: {}", .violations.join("; "))]
    InvariantViolation { violations: Vec<String> },
    #[error(
        "enforcement mode is owned by the decision policy; `{}` was not applied",
        .requested.as_str()
    )]
    EnforcementModePolicyOwned { requested: EnforcementMode },
}

/// Failures past validation. Never surfaced; they become the fail-safe result.
#[derive(Debug, Error)]
enum EngineFailure {
    #[error("policy snapshot failed: {0}")]
    Policy(#[from] PolicyError),
    #[error("execution command missing after validation")]
    MissingCommand,
    #[error("decision pipeline panicked: {0}")]
    Panicked(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// A decision together with the policy state it was made under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub result: DecisionResult,
    pub enforcement_mode: EnforcementMode,
    pub policy_version: String,
    pub fail_safe: bool,
}

pub struct EnforcementInput<'a> {
    pub enforcement_mode: EnforcementMode,
    pub risk_level: RiskLevel,
    pub mode: ExecutionMode,
    pub actor: &'a ActorCapability,
    pub voice: Option<&'a VoiceAllowance>,
    pub approval_required_min: RiskLevel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnforcementVerdict {
    pub allowed: bool,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct DecisionEngine<P> {
    resolver: P,
}

impl<P> DecisionEngine<P>
where
    P: DecisionPolicyResolver,
{
    pub fn new(resolver: P) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &P {
        &self.resolver
    }

    pub fn make_decision(&self, raw: &RawDecisionInput) -> Result<DecisionResult, DecisionError> {
        self.decide(raw).map(|outcome| outcome.result)
    }

    /// Runs the full pipeline. Invalid input and invariant violations are errors; any other
    /// failure yields the fail-safe result.
    pub fn decide(&self, raw: &RawDecisionInput) -> Result<DecisionOutcome, DecisionError> {
        let context = build_context(raw);
        let validation = validate_context(&context);
        if !validation.valid {
            warn!(
                event_name = "decision.engine.invalid_context",
                correlation_id = %context.correlation_id,
                tenant_id = %context.tenant_id.0,
                errors = %validation.errors.join("; "),
                "decision request rejected"
            );
            return Err(DecisionError::InvalidContext { errors: validation.errors });
        }

        // The resolver is an injected collaborator; a panic inside it still ends in the
        // fail-safe result.
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(&context)))
            .unwrap_or_else(|payload| Err(EngineFailure::Panicked(panic_message(payload.as_ref()))));
        let outcome = match evaluated {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    event_name = "decision.engine.fail_safe",
                    correlation_id = %context.correlation_id,
                    tenant_id = %context.tenant_id.0,
                    opportunity_id = %context.opportunity_id.0,
                    error = %failure,
                    "decision pipeline failed, returning fail-safe result"
                );
                DecisionOutcome {
                    result: fail_safe_result(&context, &failure.to_string()),
                    enforcement_mode: EnforcementMode::most_restrictive(),
                    policy_version: "unavailable".to_string(),
                    fail_safe: true,
                }
            }
        };

        validate_decision_result(&outcome.result)?;
        info!(
            event_name = "decision.engine.decided",
            correlation_id = %context.correlation_id,
            tenant_id = %context.tenant_id.0,
            opportunity_id = %context.opportunity_id.0,
            actor = outcome.result.actor.as_str(),
            mode = outcome.result.mode.as_str(),
            risk_level = outcome.result.risk_level.as_str(),
            allowed = outcome.result.allowed,
            enforcement_mode = outcome.enforcement_mode.as_str(),
            "decision made"
        );
        Ok(outcome)
    }

    pub fn make_decision_with_audit<S>(
        &self,
        raw: &RawDecisionInput,
        sink: &S,
        actor: &str,
    ) -> Result<DecisionResult, DecisionError>
    where
        S: AuditSink,
    {
        let context = build_context(raw);
        let audit = AuditContext::new(
            Some(context.tenant_id.clone()),
            Some(context.opportunity_id.clone()),
            context.correlation_id.clone(),
            actor,
        );

        match self.decide(raw) {
            Ok(outcome) => {
                let audit_outcome =
                    if outcome.result.allowed { AuditOutcome::Success } else { AuditOutcome::Rejected };
                sink.emit(
                    AuditEvent::new(&audit, "decision.made", AuditCategory::Decision, audit_outcome)
                        .with_metadata("enforcement_mode", outcome.enforcement_mode.as_str())
                        .with_metadata("policy_version", outcome.policy_version.clone())
                        .with_metadata("actor", outcome.result.actor.as_str())
                        .with_metadata("mode", outcome.result.mode.as_str())
                        .with_metadata("risk_level", outcome.result.risk_level.as_str())
                        .with_metadata("fail_safe", outcome.fail_safe.to_string()),
                );
                Ok(outcome.result)
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        &audit,
                        "decision.rejected",
                        AuditCategory::Decision,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("enforcement_mode", self.get_enforcement_mode().as_str())
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Mode of the current snapshot, or the most restrictive mode when it cannot be read.
    pub fn get_enforcement_mode(&self) -> EnforcementMode {
        let snapshot = panic::catch_unwind(AssertUnwindSafe(|| self.resolver.snapshot()))
            .map_err(|payload| EngineFailure::Panicked(panic_message(payload.as_ref())))
            .and_then(|snapshot| snapshot.map_err(EngineFailure::from));
        match snapshot {
            Ok(policy) => policy.enforcement_mode,
            Err(error) => {
                warn!(
                    event_name = "decision.engine.enforcement_mode_unavailable",
                    error = %error,
                    "falling back to most restrictive enforcement mode"
                );
                EnforcementMode::most_restrictive()
            }
        }
    }

    /// Enforcement mode is owned by the policy document; this always refuses.
    pub fn set_enforcement_mode(&self, requested: EnforcementMode) -> Result<(), DecisionError> {
        warn!(
            event_name = "decision.engine.set_enforcement_mode_refused",
            requested = requested.as_str(),
            "enforcement mode can only change through the decision policy"
        );
        Err(DecisionError::EnforcementModePolicyOwned { requested })
    }

    fn evaluate(&self, context: &DecisionContext) -> Result<DecisionOutcome, EngineFailure> {
        let policy = self.resolver.snapshot()?;
        policy.validate()?;
        let command = context.execution_command.as_ref().ok_or(EngineFailure::MissingCommand)?;

        let risk = assess_risk(context, &policy);
        let actor = select_actor(context, &risk, &policy);
        let mode = determine_execution_mode(context, &risk, actor.actor_type, &policy);

        let voice_allowance = (command.channel == Channel::Voice)
            .then(|| is_voice_allowed(context, &risk, &policy));
        let voice_selection = voice_allowance
            .as_ref()
            .filter(|allowance| allowance.allowed)
            .map(|_| select_voice_mode(context, &risk, &policy));

        let mut escalation_required =
            determine_escalation(context, &risk, actor.actor_type, mode, &policy);

        let mut constraints = Vec::new();
        merge_unique(&mut constraints, &actor.constraints);
        if risk.mitigation_required {
            merge_unique(&mut constraints, &risk.recommended_actions);
        }
        if let Some(selection) = &voice_selection {
            merge_unique(&mut constraints, &selection.constraints);
        }
        if voice_allowance.as_ref().is_some_and(|allowance| !allowance.allowed) {
            merge_unique(&mut constraints, &["voice_not_permitted".to_string()]);
        }
        if is_risk_level_at_or_above(deal_value_tier(context.deal_value, &policy), RiskLevel::High) {
            merge_unique(&mut constraints, &["high_value_deal_review".to_string()]);
        }
        if context.sla_urgency == SlaUrgency::Critical {
            merge_unique(&mut constraints, &["sla_critical_priority".to_string()]);
        }

        let verdict = enforcement_verdict(&EnforcementInput {
            enforcement_mode: policy.enforcement_mode,
            risk_level: risk.overall_risk,
            mode,
            actor: &actor,
            voice: voice_allowance.as_ref(),
            approval_required_min: policy.risk_thresholds.approval_required_min,
        });
        if !verdict.allowed && policy.enforcement_mode == EnforcementMode::BlockAndEscalate {
            escalation_required = true;
        }

        let result = DecisionResult {
            allowed: verdict.allowed,
            reason: verdict.reason,
            actor: actor.actor_type,
            mode,
            voice_mode: voice_selection.map(|selection| selection.mode),
            escalation_required,
            execution_constraints: constraints,
            risk_level: risk.overall_risk,
            decided_at: Utc::now(),
            correlation_id: context.correlation_id.clone(),
            engine_version: ENGINE_VERSION.to_string(),
        };

        Ok(DecisionOutcome {
            result,
            enforcement_mode: policy.enforcement_mode,
            policy_version: policy.version.clone(),
            fail_safe: false,
        })
    }
}

pub fn determine_execution_mode(
    context: &DecisionContext,
    risk: &RiskAssessment,
    actor: ActorType,
    policy: &DecisionPolicy,
) -> ExecutionMode {
    let thresholds = &policy.risk_thresholds;
    let level = risk.overall_risk;

    if is_risk_level_at_or_above(level, thresholds.approval_required_min) {
        return ExecutionMode::ApprovalRequired;
    }
    let assisted = is_risk_level_at_or_above(level, thresholds.assisted_min)
        || (actor == ActorType::Hybrid && policy.toggles.hybrid_always_assisted)
        || (context.sla_urgency == SlaUrgency::Critical && actor.involves_ai())
        || (context.retry_count > 0 && context.retry_count < policy.retry.escalation_threshold);
    if assisted {
        return ExecutionMode::Assisted;
    }
    if is_risk_level_at_or_below(level, thresholds.autonomous_max) {
        return ExecutionMode::Autonomous;
    }
    ExecutionMode::Assisted
}

fn determine_escalation(
    context: &DecisionContext,
    risk: &RiskAssessment,
    actor: ActorType,
    mode: ExecutionMode,
    policy: &DecisionPolicy,
) -> bool {
    let high_value = is_risk_level_at_or_above(deal_value_tier(context.deal_value, policy), RiskLevel::High);

    (risk.overall_risk == RiskLevel::Critical && policy.toggles.critical_risk_always_escalates)
        || mode == ExecutionMode::ApprovalRequired
        || context.retry_count >= policy.retry.escalation_threshold
        || (high_value && actor.involves_ai())
        || (context.sla_urgency == SlaUrgency::Critical && policy.toggles.sla_critical_always_escalates)
}

/// Base checks apply in every mode; `monitor_only` records enforcement findings in the
/// reason without blocking.
pub fn enforcement_verdict(input: &EnforcementInput<'_>) -> EnforcementVerdict {
    if !input.actor.can_execute {
        let detail = if input.actor.risk_factors.is_empty() {
            "no actor is permitted".to_string()
        } else {
            input.actor.risk_factors.join("; ")
        };
        return EnforcementVerdict { allowed: false, reason: format!("no actor can execute: {detail}") };
    }
    if let Some(voice) = input.voice.filter(|voice| !voice.allowed) {
        return EnforcementVerdict {
            allowed: false,
            reason: format!("voice not allowed: {}", voice.reason),
        };
    }

    let summary = format!(
        "{} {} at {} risk",
        input.actor.actor_type.as_str(),
        input.mode.as_str(),
        input.risk_level.as_str()
    );
    let finding = if input.risk_level == RiskLevel::Critical
        && input.mode != ExecutionMode::ApprovalRequired
    {
        Some("CRITICAL risk requires APPROVAL_REQUIRED mode".to_string())
    } else if input.actor.actor_type == ActorType::Ai
        && is_risk_level_at_or_above(input.risk_level, input.approval_required_min)
        && input.mode != ExecutionMode::ApprovalRequired
    {
        Some(format!(
            "AI actor at {} risk requires APPROVAL_REQUIRED mode",
            input.risk_level.as_str()
        ))
    } else {
        None
    };

    match finding {
        None => EnforcementVerdict { allowed: true, reason: summary },
        Some(finding) if input.enforcement_mode.is_enforcing() => {
            EnforcementVerdict { allowed: false, reason: format!("blocked: {finding}") }
        }
        Some(finding) => EnforcementVerdict {
            allowed: true,
            reason: format!("{summary} (monitor_only, would block: {finding})"),
        },
    }
}

/// Conservative result used whenever the pipeline cannot complete.
pub fn fail_safe_result(context: &DecisionContext, failure: &str) -> DecisionResult {
    DecisionResult {
        allowed: true,
        reason: format!("fail-safe: human review required ({failure})"),
        actor: ActorType::Human,
        mode: ExecutionMode::Assisted,
        voice_mode: None,
        escalation_required: true,
        execution_constraints: FAIL_SAFE_CONSTRAINTS.iter().map(|item| (*item).to_string()).collect(),
        risk_level: RiskLevel::Critical,
        decided_at: Utc::now(),
        correlation_id: context.correlation_id.clone(),
        engine_version: ENGINE_VERSION.to_string(),
    }
}

pub fn validate_decision_result(result: &DecisionResult) -> Result<(), DecisionError> {
    let mut violations = Vec::new();

    if result.reason.trim().is_empty() {
        violations.push("reason must not be empty".to_string());
    }
    if result.correlation_id.trim().is_empty() {
        violations.push("correlation_id must not be empty".to_string());
    }
    if result.engine_version.trim().is_empty() {
        violations.push("engine_version must not be empty".to_string());
    }
    for (index, constraint) in result.execution_constraints.iter().enumerate() {
        if result.execution_constraints[..index].contains(constraint) {
            violations.push(format!("duplicate execution constraint `{constraint}`"));
        }
    }
    if result.risk_level == RiskLevel::Critical && result.mode == ExecutionMode::Autonomous {
        violations.push("CRITICAL risk cannot run AUTONOMOUS".to_string());
    }
    if result.mode == ExecutionMode::ApprovalRequired && !result.escalation_required {
        violations.push("APPROVAL_REQUIRED must escalate".to_string());
    }
    if result.allowed && result.actor == ActorType::Ai && result.risk_level == RiskLevel::Critical {
        violations.push("AI cannot be allowed at CRITICAL risk".to_string());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(DecisionError::InvariantViolation { violations })
    }
}
