use std::time::Duration;

use anyhow::Result;
use neuronx_core::config::{AppConfig, LoadOptions};
use neuronx_server::{app, bootstrap, logging};

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    logging::init_logging(&config.logging);

    let application = bootstrap::bootstrap_with_config(config).await?;
    let address =
        format!("{}:{}", application.config.server.bind_address, application.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let grace = Duration::from_secs(application.config.server.graceful_shutdown_secs);

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        enforcement_mode = application.state.engine().get_enforcement_mode().as_str(),
        "neuronx-server started"
    );

    let db_pool = application.state.db_pool().clone();
    axum::serve(listener, app(application.state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "neuronx-server stopping"
    );
    if tokio::time::timeout(grace, db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            correlation_id = "shutdown",
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
