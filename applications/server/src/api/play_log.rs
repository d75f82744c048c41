/// Play log API routes
use crate::{
    error::{Result, ServerError},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Json,
};
use playlog_core::{PlayHistoryEntry, PlayProgressRecord, ProgressEvent, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SetPlayLogResponse {
    pub status: &'static str,
    pub record: PlayProgressRecord,
}

#[derive(Debug, Deserialize)]
pub struct GetPlayLogsQuery {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub include_buffered: bool,
}

#[derive(Debug, Serialize)]
pub struct GetPlayLogsResponse {
    pub user_id: UserId,
    pub data: Vec<PlayHistoryEntry>,
}

/// POST /api/play_log/set
/// Buffer the latest playback position for (user, song)
pub async fn set_play_log(
    State(app_state): State<AppState>,
    payload: std::result::Result<Json<ProgressEvent>, JsonRejection>,
) -> Result<Json<SetPlayLogResponse>> {
    let Json(event) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let update = event.validate()?;
    let record = app_state.buffer.record_progress(update).await?;

    Ok(Json(SetPlayLogResponse {
        status: "buffered",
        record,
    }))
}

/// GET /api/play_log/get?user_id=N
/// Most recent plays, finished songs reset to the start
pub async fn get_play_logs(
    State(app_state): State<AppState>,
    query: std::result::Result<Query<GetPlayLogsQuery>, QueryRejection>,
) -> Result<Json<GetPlayLogsResponse>> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let Some(user_id) = query.user_id.map(UserId::new) else {
        tracing::warn!("Play log query without user_id");
        return Err(ServerError::BadRequest("user_id is required".to_string()));
    };

    let data = if query.include_buffered {
        app_state
            .history
            .recent_with_buffered(user_id, &app_state.buffer)
            .await?
    } else {
        app_state.history.recent(user_id).await?
    };

    Ok(Json(GetPlayLogsResponse { user_id, data }))
}
