pub mod api;
pub mod bootstrap;
pub mod health;
pub mod logging;

use axum::Router;

use crate::api::ApiState;

/// Full HTTP surface: health plus the versioned API.
pub fn app(state: ApiState) -> Router {
    health::router(state.clone()).merge(api::router(state))
}
