use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use neuronx_db::{ping, DbPool};
use serde::Serialize;

use crate::api::ApiState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub policy: HealthCheck,
    pub checked_at: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(state.db_pool()).await;
    let policy = policy_check(&state);
    let ready = database.is_ready() && policy.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck::ready(concat!("neuronx-server ", env!("CARGO_PKG_VERSION"))),
        database,
        policy,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

fn policy_check(state: &ApiState) -> HealthCheck {
    match state.policy_snapshot() {
        Ok(policy) => HealthCheck::ready(format!(
            "policy {} loaded ({})",
            policy.version,
            policy.enforcement_mode.as_str()
        )),
        Err(error) => HealthCheck::degraded(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};

    use crate::api::test_support::memory_state;
    use crate::health::health;

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let state = memory_state().await;

        let (status, Json(payload)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert!(payload.policy.detail.contains("builtin-1"));

        state.db_pool().close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let state = memory_state().await;
        state.db_pool().close().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.policy.status, "ready");
    }
}
