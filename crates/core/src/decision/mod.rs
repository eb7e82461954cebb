//! Decision layer: context building, risk gate, actor and voice selection, and the engine
//! that combines them under a policy snapshot.

pub mod actor;
pub mod context;
pub mod engine;
pub mod policy;
pub mod risk;
pub mod voice;

pub use actor::{assess_actor_capabilities, select_actor};
pub use context::{
    build_context, validate_context, ContextValidation, RawDecisionInput, RawExecutionCommand,
};
pub use engine::{
    validate_decision_result, DecisionEngine, DecisionError, DecisionOutcome, ENGINE_VERSION,
};
pub use policy::{
    is_risk_level_at_or_above, is_risk_level_at_or_below, DecisionPolicy, DecisionPolicyResolver,
    EnforcementMode, PolicyError, StaticPolicyResolver, SwappablePolicyResolver,
};
pub use risk::assess_risk;
pub use voice::{is_voice_allowed, select_voice_mode, VoiceAllowance, VoiceModeSelection};

/// Appends items not already present, keeping first-seen order.
pub(crate) fn merge_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
