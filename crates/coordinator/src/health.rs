//! Minimal REST surface the core retains: a health probe over the same
//! stats `Coordinator::health` reports. The full submit/status/cancel
//! REST API and its authentication belong to the HTTP surface this spec
//! treats as an external collaborator (§1); this route exists only so
//! the dashboard and operators have something to poll without a broker
//! client of their own.

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.health().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}
