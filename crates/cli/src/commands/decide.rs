use std::fs;
use std::path::Path;

use anyhow::Context;
use neuronx_core::audit::InMemoryAuditSink;
use neuronx_core::config::{AppConfig, LoadOptions};
use neuronx_core::decision::{DecisionEngine, RawDecisionInput, StaticPolicyResolver};
use serde_json::json;

use crate::commands::{to_data, CommandResult};

pub fn run(input: &Path, actor: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "decide",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    let policy = match config.load_policy() {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure("decide", "policy", error.to_string(), 2);
        }
    };

    let raw = match read_input(input) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure("decide", "invalid_input", format!("{error:#}"), 3);
        }
    };

    let engine = DecisionEngine::new(StaticPolicyResolver::new(policy));
    let sink = InMemoryAuditSink::default();
    let decision = engine.make_decision_with_audit(&raw, &sink, actor);
    let audit_events = to_data(&sink.events());

    match decision {
        Ok(result) => CommandResult::success_with(
            "decide",
            format!(
                "{} {} at {} risk (allowed: {})",
                result.actor.as_str(),
                result.mode.as_str(),
                result.risk_level.as_str(),
                result.allowed
            ),
            Some(json!({
                "enforcement_mode": engine.get_enforcement_mode(),
                "result": to_data(&result),
                "audit_events": audit_events,
            })),
        ),
        Err(error) => CommandResult::failure("decide", "decision_rejected", error.to_string(), 4),
    }
}

fn read_input(path: &Path) -> anyhow::Result<RawDecisionInput> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read decision request `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("decision request `{}` is not valid JSON", path.display()))
}
