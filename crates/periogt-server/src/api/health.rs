//! Health check endpoint

use axum::{extract::State, Json};
use periogt_core::HealthStatus;

use crate::state::AppState;

/// Readiness snapshot; always 200, failures are reported in the body.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.runtime.health().await)
}
