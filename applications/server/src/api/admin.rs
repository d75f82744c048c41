/// Admin API routes
use crate::{error::Result, state::AppState};
use axum::{extract::State, Json};
use playlog_core::FlushReport;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BufferStatusResponse {
    pub buffered: usize,
}

/// POST /api/admin/flush
/// Run one flush pass now and report what it did
pub async fn trigger_flush(State(app_state): State<AppState>) -> Result<Json<FlushReport>> {
    let limit = app_state.config.flush.pass_timeout();
    let report = app_state.flusher.run_pass_with_timeout(limit).await?;
    Ok(Json(report))
}

/// GET /api/admin/buffer
pub async fn buffer_status(State(app_state): State<AppState>) -> Result<Json<BufferStatusResponse>> {
    let buffered = app_state.buffer.len().await?;
    Ok(Json(BufferStatusResponse { buffered }))
}
