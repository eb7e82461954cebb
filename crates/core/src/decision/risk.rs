use rust_decimal::Decimal;

use super::policy::{is_risk_level_at_or_above, max_risk_level, DecisionPolicy};
use crate::domain::decision::{DecisionContext, RiskAssessment, RiskLevel};

struct RiskSignal {
    level: RiskLevel,
    reason: String,
}

/// Maps each independent signal to a level and takes the maximum.
pub fn assess_risk(context: &DecisionContext, policy: &DecisionPolicy) -> RiskAssessment {
    let signals = [
        deal_value_signal(context.deal_value, policy),
        customer_risk_signal(context.customer_risk_score, policy),
        RiskSignal {
            level: policy.sla_risk.level_for(context.sla_urgency),
            reason: format!("sla urgency is {}", context.sla_urgency.as_str()),
        },
        retry_signal(context.retry_count, policy),
        evidence_signal(&context.evidence_so_far, policy),
    ];

    let overall_risk = signals
        .iter()
        .fold(RiskLevel::Low, |overall, signal| max_risk_level(overall, signal.level));
    let risk_factors = signals
        .into_iter()
        .filter(|signal| is_risk_level_at_or_above(signal.level, RiskLevel::Medium))
        .map(|signal| signal.reason)
        .collect();

    RiskAssessment {
        overall_risk,
        risk_factors,
        mitigation_required: is_risk_level_at_or_above(overall_risk, RiskLevel::High),
        recommended_actions: recommended_actions(overall_risk),
    }
}

pub fn deal_value_tier(deal_value: Option<Decimal>, policy: &DecisionPolicy) -> RiskLevel {
    deal_value_signal(deal_value, policy).level
}

fn deal_value_signal(deal_value: Option<Decimal>, policy: &DecisionPolicy) -> RiskSignal {
    let thresholds = &policy.deal_value;
    let Some(value) = deal_value else {
        return RiskSignal { level: RiskLevel::Low, reason: "deal value unknown".to_string() };
    };

    let (level, threshold) = if value >= thresholds.critical {
        (RiskLevel::Critical, thresholds.critical)
    } else if value >= thresholds.high {
        (RiskLevel::High, thresholds.high)
    } else if value >= thresholds.medium {
        (RiskLevel::Medium, thresholds.medium)
    } else {
        return RiskSignal { level: RiskLevel::Low, reason: format!("deal value {value}") };
    };

    RiskSignal {
        level,
        reason: format!(
            "deal value {value} at or above {} threshold {threshold}",
            level.as_str().to_ascii_lowercase()
        ),
    }
}

fn customer_risk_signal(score: Option<f64>, policy: &DecisionPolicy) -> RiskSignal {
    let thresholds = &policy.customer_risk;
    let Some(score) = score else {
        return RiskSignal { level: RiskLevel::Low, reason: "customer risk unknown".to_string() };
    };

    let level = if score >= thresholds.critical {
        RiskLevel::Critical
    } else if score >= thresholds.high {
        RiskLevel::High
    } else if score >= thresholds.medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskSignal { level, reason: format!("customer risk score {score:.2}") }
}

fn retry_signal(retry_count: u32, policy: &DecisionPolicy) -> RiskSignal {
    let limits = &policy.retry;
    let level = if retry_count >= limits.max_retries {
        RiskLevel::Critical
    } else if retry_count >= limits.escalation_threshold {
        RiskLevel::High
    } else if retry_count > 0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskSignal { level, reason: format!("{retry_count} previous attempts") }
}

fn evidence_signal(evidence: &[String], policy: &DecisionPolicy) -> RiskSignal {
    let matches = |tags: &[String]| {
        evidence
            .iter()
            .filter(|item| tags.iter().any(|tag| tag.eq_ignore_ascii_case(item)))
            .cloned()
            .collect::<Vec<_>>()
    };

    let critical = matches(policy.evidence.critical.as_slice());
    if !critical.is_empty() {
        return RiskSignal {
            level: RiskLevel::Critical,
            reason: format!("critical evidence: {}", critical.join(", ")),
        };
    }

    let negative = matches(policy.evidence.negative.as_slice());
    let level = match negative.len() {
        0 => RiskLevel::Low,
        1 => RiskLevel::Medium,
        _ => RiskLevel::High,
    };
    RiskSignal { level, reason: format!("negative evidence: {}", negative.join(", ")) }
}

fn recommended_actions(level: RiskLevel) -> Vec<String> {
    let actions: &[&str] = match level {
        RiskLevel::Low => &["proceed_with_standard_monitoring"],
        RiskLevel::Medium => &["review_before_send"],
        RiskLevel::High => &["require_human_approval", "log_detailed_rationale"],
        RiskLevel::Critical => &[
            "require_human_approval",
            "escalate_to_senior_operator",
            "pause_automated_outreach",
        ],
    };
    actions.iter().map(|action| (*action).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::assess_risk;
    use crate::decision::policy::DecisionPolicy;
    use crate::domain::decision::{
        Channel, DecisionContext, ExecutionCommand, OpportunityId, RiskLevel, SlaUrgency, TenantId,
    };

    fn context() -> DecisionContext {
        DecisionContext {
            tenant_id: TenantId("tenant-1".to_string()),
            opportunity_id: OpportunityId("opp-1".to_string()),
            stage_id: "qualify".to_string(),
            execution_command: Some(ExecutionCommand {
                channel: Channel::Sms,
                action_type: "follow_up".to_string(),
                ai_allowed: true,
                human_allowed: true,
                voice_mode: None,
            }),
            deal_value: Some(Decimal::new(500, 0)),
            customer_risk_score: Some(0.2),
            sla_urgency: SlaUrgency::Normal,
            retry_count: 0,
            evidence_so_far: Vec::new(),
            playbook_version: "pb-1".to_string(),
            correlation_id: "corr-1".to_string(),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn quiet_context_is_low_risk_without_factors() {
        let assessment = assess_risk(&context(), &DecisionPolicy::default());

        assert_eq!(assessment.overall_risk, RiskLevel::Low);
        assert!(assessment.risk_factors.is_empty());
        assert!(!assessment.mitigation_required);
        assert_eq!(assessment.recommended_actions, vec!["proceed_with_standard_monitoring"]);
    }

    #[test]
    fn overall_risk_is_the_maximum_signal() {
        let mut ctx = context();
        ctx.deal_value = Some(Decimal::new(60_000, 0));
        ctx.retry_count = 1;
        let assessment = assess_risk(&ctx, &DecisionPolicy::default());

        assert_eq!(assessment.overall_risk, RiskLevel::High);
        assert_eq!(assessment.risk_factors.len(), 2);
        assert!(assessment.risk_factors[0].contains("deal value 60000"));
        assert!(assessment.mitigation_required);
    }

    #[test]
    fn retry_tiers_follow_policy_limits() {
        let policy = DecisionPolicy::default();
        let expected = [
            (0, RiskLevel::Low),
            (1, RiskLevel::Medium),
            (2, RiskLevel::Medium),
            (3, RiskLevel::High),
            (4, RiskLevel::High),
            (5, RiskLevel::Critical),
            (9, RiskLevel::Critical),
        ];
        for (retry_count, level) in expected {
            let mut ctx = context();
            ctx.retry_count = retry_count;
            assert_eq!(assess_risk(&ctx, &policy).overall_risk, level, "retry {retry_count}");
        }
    }

    #[test]
    fn evidence_tags_escalate_by_count_and_severity() {
        let policy = DecisionPolicy::default();

        let mut ctx = context();
        ctx.evidence_so_far = vec!["price_objection".to_string()];
        assert_eq!(assess_risk(&ctx, &policy).overall_risk, RiskLevel::Medium);

        ctx.evidence_so_far.push("unresponsive".to_string());
        assert_eq!(assess_risk(&ctx, &policy).overall_risk, RiskLevel::High);

        ctx.evidence_so_far.push("legal_threat".to_string());
        let assessment = assess_risk(&ctx, &policy);
        assert_eq!(assessment.overall_risk, RiskLevel::Critical);
        assert!(assessment.risk_factors.iter().any(|factor| factor.contains("legal_threat")));
    }

    #[test]
    fn critical_sla_and_customer_risk_map_through_tables() {
        let policy = DecisionPolicy::default();

        let mut ctx = context();
        ctx.sla_urgency = SlaUrgency::Critical;
        assert_eq!(assess_risk(&ctx, &policy).overall_risk, RiskLevel::High);

        let mut ctx = context();
        ctx.customer_risk_score = Some(0.85);
        assert_eq!(assess_risk(&ctx, &policy).overall_risk, RiskLevel::Critical);
    }

    #[test]
    fn assessment_is_deterministic() {
        let mut ctx = context();
        ctx.deal_value = Some(Decimal::new(12_000, 0));
        ctx.evidence_so_far = vec!["complaint".to_string()];
        let policy = DecisionPolicy::default();
        assert_eq!(assess_risk(&ctx, &policy), assess_risk(&ctx, &policy));
    }
}
