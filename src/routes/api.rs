//! HTTP route configuration for the health/info surface.

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::api::{health_check, service_info};
use crate::state::AppState;

/// Create the HTTP API router.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(service_info))
}
