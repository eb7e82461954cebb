use neuronx_core::authority::validate_approval_chain;
use neuronx_core::config::{AppConfig, LoadOptions};
use neuronx_db::{connect_with_config, ping};
use serde::Serialize;

use crate::commands::CommandResult;

const CONFIG_DEPENDENT_CHECKS: [&str; 2] = ["decision_policy", "database_connectivity"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }

    fn from_outcome(name: &'static str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(details) => Self::pass(name, details),
            Err(details) => Self::fail(name, details),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let passed = checks.iter().filter(|check| check.status == CheckStatus::Pass).count();
        let (overall_status, summary) = if passed == checks.len() {
            (CheckStatus::Pass, "doctor: all readiness checks passed".to_string())
        } else {
            (
                CheckStatus::Fail,
                format!("doctor: {passed} of {} readiness checks passed", checks.len()),
            )
        };
        Self { overall_status, summary, checks }
    }

    fn render(&self) -> String {
        let mut rendered = self.summary.clone();
        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Pass => "ok",
                CheckStatus::Fail => "fail",
                CheckStatus::Skipped => "skip",
            };
            rendered.push_str(&format!("\n- [{marker}] {}: {}", check.name, check.details));
        }
        rendered
    }
}

/// Runs readiness checks. Exit code 1 when any check does not pass.
pub fn run(json_output: bool) -> CommandResult {
    let mut checks =
        vec![DoctorCheck::from_outcome("approval_chain_consistency", approval_chain_outcome())];

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(DoctorCheck::from_outcome("decision_policy", policy_outcome(&config)));
            checks.push(DoctorCheck::from_outcome(
                "database_connectivity",
                database_outcome(&config),
            ));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(CONFIG_DEPENDENT_CHECKS.into_iter().map(DoctorCheck::skipped));
        }
    }

    let report = DoctorReport::from_checks(checks);
    let exit_code = u8::from(report.overall_status != CheckStatus::Pass);
    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor report could not be serialized\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        report.render()
    };

    CommandResult { exit_code, output }
}

fn approval_chain_outcome() -> Result<String, String> {
    let validation = validate_approval_chain();
    if validation.valid {
        Ok(format!("{} scenarios consistent", validation.scenarios_checked))
    } else {
        Err(validation.failures.join("; "))
    }
}

fn policy_outcome(config: &AppConfig) -> Result<String, String> {
    let policy = config.load_policy().map_err(|error| error.to_string())?;
    Ok(format!(
        "policy {} valid, enforcement mode {}",
        policy.version,
        policy.enforcement_mode.as_str()
    ))
}

fn database_outcome(config: &AppConfig) -> Result<String, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| format!("failed to initialize async runtime: {error}"))?;

    runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pinged = ping(&pool).await;
        pool.close().await;
        pinged.map_err(|error| format!("database query failed: {error}"))?;
        Ok(format!("connected using `{}`", config.database.url))
    })
}
