use std::sync::Arc;

use neuronx_core::config::{AppConfig, ConfigError, LoadOptions};
use neuronx_core::decision::{DecisionEngine, PolicyError, SwappablePolicyResolver};
use neuronx_db::{
    connect_with_config, migrations, SqlDecisionAuditRepository, SqlRoleAssignmentRepository,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub state: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("decision policy rejected: {0}")]
    Policy(#[from] PolicyError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let policy = config.load_policy()?;
    let resolver = Arc::new(SwappablePolicyResolver::new(policy)?);
    let engine = DecisionEngine::new(resolver);
    info!(
        event_name = "system.bootstrap.policy_loaded",
        correlation_id = "bootstrap",
        policy_path = %config
            .policy
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string()),
        enforcement_mode = engine.get_enforcement_mode().as_str(),
        "decision policy loaded"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let state = ApiState::new(
        Arc::new(engine),
        db_pool.clone(),
        Arc::new(SqlRoleAssignmentRepository::new(db_pool.clone())),
        Arc::new(SqlDecisionAuditRepository::new(db_pool)),
    );

    Ok(Application { config, state })
}
