use std::path::Path;

use neuronx_core::config::{AppConfig, LoadOptions};
use neuronx_core::decision::DecisionPolicy;
use serde_json::json;

use crate::commands::{to_data, CommandResult};

/// Validates the policy at `path`, or the configured policy when no path is given.
pub fn run(path: Option<&Path>) -> CommandResult {
    let (source, loaded) = match path {
        Some(path) => (path.display().to_string(), DecisionPolicy::load_from_path(path)),
        None => match AppConfig::load(LoadOptions::default()) {
            Ok(config) => {
                let source = config
                    .policy
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "builtin".to_string());
                match config.load_policy() {
                    Ok(policy) => (source, Ok(policy)),
                    Err(error) => {
                        return CommandResult::failure("policy-check", "policy", error.to_string(), 3)
                    }
                }
            }
            Err(error) => {
                return CommandResult::failure(
                    "policy-check",
                    "config_validation",
                    format!("configuration issue: {error}"),
                    2,
                );
            }
        },
    };

    match loaded {
        Ok(policy) => CommandResult::success_with(
            "policy-check",
            format!(
                "policy {} from {source} is valid ({})",
                policy.version,
                policy.enforcement_mode.as_str()
            ),
            Some(json!({ "source": source, "policy": to_data(&policy) })),
        ),
        Err(error) => CommandResult::failure("policy-check", "policy", error.to_string(), 3),
    }
}
