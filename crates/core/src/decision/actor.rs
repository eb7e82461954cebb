use std::collections::BTreeMap;

use super::merge_unique;
use super::policy::{is_risk_level_at_or_above, is_risk_level_at_or_below, DecisionPolicy};
use super::risk::deal_value_tier;
use crate::domain::decision::{
    ActorCapability, ActorType, DecisionContext, RiskAssessment, RiskLevel, SlaUrgency,
};

const SELECTION_PRIORITY: [ActorType; 3] = [ActorType::Human, ActorType::Hybrid, ActorType::Ai];

pub fn assess_actor_capabilities(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> BTreeMap<ActorType, ActorCapability> {
    let ai = ai_capability(context, risk, policy);
    let human = human_capability(context, risk, policy);
    let hybrid = hybrid_capability(&ai, &human);

    BTreeMap::from([(ActorType::Ai, ai), (ActorType::Human, human), (ActorType::Hybrid, hybrid)])
}

/// Picks the first executable actor in HUMAN > HYBRID > AI order. When nobody can execute,
/// the non-executable HUMAN capability comes back so the engine blocks.
pub fn select_actor(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> ActorCapability {
    let mut capabilities = assess_actor_capabilities(context, risk, policy);
    let selected = SELECTION_PRIORITY
        .into_iter()
        .find(|actor| capabilities.get(actor).is_some_and(|capability| capability.can_execute))
        .unwrap_or(ActorType::Human);

    capabilities.remove(&selected).unwrap_or_else(|| ActorCapability {
        actor_type: ActorType::Human,
        can_execute: false,
        confidence: 0.0,
        constraints: Vec::new(),
        risk_factors: vec!["no actor capability available".to_string()],
    })
}

fn ai_capability(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> ActorCapability {
    let thresholds = &policy.risk_thresholds;
    let ai_allowed = context.execution_command.as_ref().is_some_and(|command| command.ai_allowed);
    let mut risk_factors = Vec::new();

    if !ai_allowed {
        risk_factors.push("command does not allow ai execution".to_string());
    }
    if !is_risk_level_at_or_below(risk.overall_risk, thresholds.ai_allowed_max) {
        risk_factors.push(format!(
            "risk {} exceeds ai maximum {}",
            risk.overall_risk.as_str(),
            thresholds.ai_allowed_max.as_str()
        ));
    }
    if is_risk_level_at_or_above(risk.overall_risk, thresholds.human_required_min) {
        risk_factors.push(format!("risk {} requires a human", risk.overall_risk.as_str()));
    }

    let deal_tier = deal_value_tier(context.deal_value, policy);
    let retry_exponent = i32::try_from(context.retry_count).unwrap_or(i32::MAX);
    let mut confidence = 0.9 * 0.8_f64.powi(retry_exponent);
    if is_risk_level_at_or_above(deal_tier, RiskLevel::High) {
        confidence *= 0.7;
    } else if is_risk_level_at_or_above(deal_tier, RiskLevel::Medium) {
        confidence *= 0.9;
    }

    let mut constraints = vec!["ai_disclosure_required".to_string()];
    if context.retry_count > 0 {
        constraints.push("ai_monitor_retry_pattern".to_string());
    }
    if is_risk_level_at_or_above(deal_tier, RiskLevel::Medium) {
        constraints.push("ai_no_pricing_commitments".to_string());
    }

    ActorCapability {
        actor_type: ActorType::Ai,
        can_execute: risk_factors.is_empty(),
        confidence: confidence.clamp(0.0, 1.0),
        constraints,
        risk_factors,
    }
}

fn human_capability(
    context: &DecisionContext,
    risk: &RiskAssessment,
    policy: &DecisionPolicy,
) -> ActorCapability {
    let human_allowed =
        context.execution_command.as_ref().is_some_and(|command| command.human_allowed);

    let mut confidence: f64 = 0.85;
    if risk.overall_risk == RiskLevel::Critical {
        confidence += 0.1;
    }
    if context.sla_urgency == SlaUrgency::Critical {
        confidence += 0.05;
    }

    let mut constraints = Vec::new();
    if is_risk_level_at_or_above(risk.overall_risk, policy.risk_thresholds.approval_required_min) {
        constraints.push("human_review_required".to_string());
    }
    if context.sla_urgency == SlaUrgency::Critical {
        constraints.push("respond_within_sla".to_string());
    }

    let risk_factors = if human_allowed {
        Vec::new()
    } else {
        vec!["command does not allow human execution".to_string()]
    };

    ActorCapability {
        actor_type: ActorType::Human,
        can_execute: human_allowed,
        confidence: confidence.min(1.0),
        constraints,
        risk_factors,
    }
}

fn hybrid_capability(ai: &ActorCapability, human: &ActorCapability) -> ActorCapability {
    let mut constraints = vec!["human_supervises_ai".to_string()];
    merge_unique(&mut constraints, &ai.constraints);
    merge_unique(&mut constraints, &human.constraints);

    let mut risk_factors = Vec::new();
    merge_unique(&mut risk_factors, &ai.risk_factors);
    merge_unique(&mut risk_factors, &human.risk_factors);

    ActorCapability {
        actor_type: ActorType::Hybrid,
        can_execute: ai.can_execute && human.can_execute,
        confidence: ai.confidence.min(human.confidence),
        constraints,
        risk_factors,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{assess_actor_capabilities, select_actor};
    use crate::decision::policy::DecisionPolicy;
    use crate::decision::risk::assess_risk;
    use crate::domain::decision::{
        ActorType, Channel, DecisionContext, ExecutionCommand, OpportunityId, RiskLevel,
        SlaUrgency, TenantId,
    };

    fn generated_contexts() -> Vec<DecisionContext> {
        let mut contexts = Vec::new();
        for (ai_allowed, human_allowed) in [(true, true), (true, false), (false, true), (false, false)] {
            for deal_value in [None, Some(2_000), Some(15_000), Some(75_000), Some(300_000)] {
                for score in [None, Some(0.1), Some(0.5), Some(0.7), Some(0.9)] {
                    for sla in [SlaUrgency::Low, SlaUrgency::Normal, SlaUrgency::High, SlaUrgency::Critical] {
                        for retry_count in [0, 1, 3, 5] {
                            let mut ctx = context(ai_allowed, human_allowed);
                            ctx.deal_value = deal_value.map(|value| Decimal::new(value, 0));
                            ctx.customer_risk_score = score;
                            ctx.sla_urgency = sla;
                            ctx.retry_count = retry_count;
                            contexts.push(ctx);
                        }
                    }
                }
            }
        }
        contexts
    }

    fn context(ai_allowed: bool, human_allowed: bool) -> DecisionContext {
        DecisionContext {
            tenant_id: TenantId("tenant-1".to_string()),
            opportunity_id: OpportunityId("opp-1".to_string()),
            stage_id: "nurture".to_string(),
            execution_command: Some(ExecutionCommand {
                channel: Channel::Email,
                action_type: "follow_up".to_string(),
                ai_allowed,
                human_allowed,
                voice_mode: None,
            }),
            deal_value: Some(Decimal::new(2_000, 0)),
            customer_risk_score: Some(0.1),
            sla_urgency: SlaUrgency::Normal,
            retry_count: 0,
            evidence_so_far: Vec::new(),
            playbook_version: "pb-1".to_string(),
            correlation_id: "corr-1".to_string(),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn hybrid_is_conjunction_of_ai_and_human() {
        let policy = DecisionPolicy::default();
        for (ai_allowed, human_allowed) in [(true, true), (true, false), (false, true), (false, false)]
        {
            let ctx = context(ai_allowed, human_allowed);
            let risk = assess_risk(&ctx, &policy);
            let capabilities = assess_actor_capabilities(&ctx, &risk, &policy);

            let ai = &capabilities[&ActorType::Ai];
            let human = &capabilities[&ActorType::Human];
            let hybrid = &capabilities[&ActorType::Hybrid];
            assert_eq!(hybrid.can_execute, ai.can_execute && human.can_execute);
            assert!((hybrid.confidence - ai.confidence.min(human.confidence)).abs() < f64::EPSILON);
            for constraint in ai.constraints.iter().chain(&human.constraints) {
                assert!(hybrid.constraints.contains(constraint));
            }
        }
    }

    #[test]
    fn selection_prefers_human_then_hybrid_then_ai() {
        let policy = DecisionPolicy::default();

        let ctx = context(true, true);
        let risk = assess_risk(&ctx, &policy);
        assert_eq!(select_actor(&ctx, &risk, &policy).actor_type, ActorType::Human);

        let ctx = context(true, false);
        let risk = assess_risk(&ctx, &policy);
        let selected = select_actor(&ctx, &risk, &policy);
        assert_eq!(selected.actor_type, ActorType::Ai);
        assert!(selected.can_execute);
    }

    #[test]
    fn repeated_selection_is_identical_for_identical_input() {
        let policy = DecisionPolicy::default();
        for ctx in generated_contexts() {
            let risk = assess_risk(&ctx, &policy);
            let first = select_actor(&ctx, &risk, &policy);

            for _ in 0..3 {
                let replay = ctx.clone();
                let replay_risk = assess_risk(&replay, &policy);
                assert_eq!(replay_risk, risk);
                assert_eq!(select_actor(&replay, &replay_risk, &policy), first);
            }
        }
    }

    #[test]
    fn no_executable_actor_returns_blocked_human() {
        let policy = DecisionPolicy::default();
        let ctx = context(false, false);
        let risk = assess_risk(&ctx, &policy);
        let selected = select_actor(&ctx, &risk, &policy);

        assert_eq!(selected.actor_type, ActorType::Human);
        assert!(!selected.can_execute);
    }

    #[test]
    fn ai_is_blocked_above_its_risk_ceiling() {
        let policy = DecisionPolicy::default();
        let mut ctx = context(true, false);
        ctx.retry_count = 3;
        let risk = assess_risk(&ctx, &policy);
        assert_eq!(risk.overall_risk, RiskLevel::High);

        let capabilities = assess_actor_capabilities(&ctx, &risk, &policy);
        let ai = &capabilities[&ActorType::Ai];
        assert!(!ai.can_execute);
        assert!(ai.risk_factors.iter().any(|factor| factor.contains("exceeds ai maximum")));
    }

    #[test]
    fn ai_confidence_degrades_with_retries_and_deal_value() {
        let policy = DecisionPolicy::default();
        let confidence_for = |retry_count: u32, deal: i64| {
            let mut ctx = context(true, true);
            ctx.retry_count = retry_count;
            ctx.deal_value = Some(Decimal::new(deal, 0));
            let risk = assess_risk(&ctx, &policy);
            assess_actor_capabilities(&ctx, &risk, &policy)[&ActorType::Ai].confidence
        };

        let baseline = confidence_for(0, 1_000);
        assert!((baseline - 0.9).abs() < 1e-9);
        assert!(confidence_for(1, 1_000) < baseline);
        assert!(confidence_for(2, 1_000) < confidence_for(1, 1_000));
        assert!(confidence_for(0, 20_000) < baseline);
        assert!(confidence_for(0, 60_000) < confidence_for(0, 20_000));
    }

    #[test]
    fn human_confidence_rises_for_critical_conditions() {
        let policy = DecisionPolicy::default();
        let ctx = context(true, true);
        let risk = assess_risk(&ctx, &policy);
        let calm = assess_actor_capabilities(&ctx, &risk, &policy)[&ActorType::Human].confidence;

        let mut urgent = context(true, true);
        urgent.sla_urgency = SlaUrgency::Critical;
        urgent.evidence_so_far = vec!["legal_threat".to_string()];
        let risk = assess_risk(&urgent, &policy);
        let capability = &assess_actor_capabilities(&urgent, &risk, &policy)[&ActorType::Human];

        assert!(capability.confidence > calm);
        assert!(capability.confidence <= 1.0);
        assert!(capability.constraints.contains(&"respond_within_sla".to_string()));
    }
}
