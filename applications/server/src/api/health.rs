/// Health check API routes
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether the buffer store answered a scan
    pub buffer: &'static str,
}

/// GET /api/health - Health check endpoint
///
/// Reports `degraded` while the buffer store is unreachable; ingestion fails
/// in that state but history reads still work.
pub async fn health(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let (status, buffer) = match app_state.buffer.len().await {
        Ok(_) => ("ok", "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: buffer store unavailable");
            ("degraded", "unavailable")
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        buffer,
    })
}
