/// API integration tests
/// Tests complete HTTP request/response cycles with a real database
mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use common::{eager_config, TestApp};
use playlog_core::{PlayProgressRecord, SongId, UserId};
use serde_json::json;

fn progress(user: i64, song: i64, position: f64, duration: f64) -> serde_json::Value {
    json!({
        "user_id": user,
        "song_id": song,
        "song_name": format!("Song {song}"),
        "position_seconds": position,
        "duration_seconds": duration,
    })
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["buffer"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_reports_unavailable_buffer() {
    let app = TestApp::new().await;
    app.store.set_available(false);

    let (status, body) = app.get("/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["buffer"], "unavailable");
}

#[tokio::test]
async fn test_set_play_log_buffers_record() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post_json("/api/play_log/set", &progress(1, 100, 10.0, 200.0))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "buffered");
    assert_eq!(body["record"]["user_id"], 1);
    assert_eq!(body["record"]["song_id"], 100);
    assert_eq!(body["record"]["position_seconds"], 10.0);

    let (_, buffer) = app.get("/api/admin/buffer").await;
    assert_eq!(buffer["buffered"], 1);
}

#[tokio::test]
async fn test_set_play_log_accepts_legacy_field_names() {
    let app = TestApp::new().await;
    let body = json!({
        "user_id": 2,
        "song_id": 7,
        "song_name": "Legacy Client",
        "current_time": 42.5,
        "duration": 180.0,
    });

    let (status, _) = app.post_json("/api/play_log/set", &body).await;
    assert_eq!(status, StatusCode::OK);

    let record = app
        .state
        .buffer
        .get(UserId::new(2), SongId::new(7))
        .await
        .unwrap()
        .expect("record should be buffered");
    assert_eq!(record.position_seconds, 42.5);
    assert_eq!(record.duration_seconds, 180.0);
}

#[tokio::test]
async fn test_set_play_log_missing_field_is_rejected() {
    let app = TestApp::new().await;
    let body = json!({ "song_id": 1, "position_seconds": 1.0, "duration_seconds": 2.0 });

    let (status, body) = app.post_json("/api/play_log/set", &body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("user_id"));
    let (_, buffer) = app.get("/api/admin/buffer").await;
    assert_eq!(buffer["buffered"], 0);
}

#[tokio::test]
async fn test_set_play_log_negative_position_is_rejected() {
    let app = TestApp::new().await;

    let (status, _) = app
        .post_json("/api/play_log/set", &progress(1, 1, -3.0, 200.0))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_play_log_malformed_json_is_rejected() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .uri("/api/play_log/set")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"user_id\": "))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_set_play_log_with_store_down_returns_503() {
    let app = TestApp::new().await;
    app.store.set_available(false);

    let (status, body) = app
        .post_json("/api/play_log/set", &progress(1, 1, 1.0, 200.0))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_get_play_logs_requires_user_id() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/play_log/get").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user_id is required");

    let (status, _) = app.get("/api/play_log/get?user_id=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_play_logs_empty_history() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/play_log/get?user_id=5").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], 5);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_ingest_flush_query_scenario() {
    let app = TestApp::with_config(eager_config()).await;

    app.post_json("/api/play_log/set", &progress(1, 100, 10.0, 200.0))
        .await;
    app.post_json("/api/play_log/set", &progress(1, 100, 15.0, 200.0))
        .await;

    let (_, buffer) = app.get("/api/admin/buffer").await;
    assert_eq!(buffer["buffered"], 1);

    let (status, report) = app.post_empty("/api/admin/flush").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["scanned"], 1);
    assert_eq!(report["flushed"], 1);

    let (_, buffer) = app.get("/api/admin/buffer").await;
    assert_eq!(buffer["buffered"], 0);

    let (status, body) = app.get("/api/play_log/get?user_id=1").await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["song_id"], 100);
    assert_eq!(data[0]["position_seconds"], 15.0);
    assert_eq!(data[0]["pending"], false);
}

#[tokio::test]
async fn test_fresh_records_wait_for_threshold() {
    let app = TestApp::new().await;

    app.post_json("/api/play_log/set", &progress(1, 100, 10.0, 200.0))
        .await;

    let (_, report) = app.post_empty("/api/admin/flush").await;
    assert_eq!(report["fresh"], 1);
    assert_eq!(report["flushed"], 0);

    let (_, body) = app.get("/api/play_log/get?user_id=1").await;
    assert_eq!(body["data"], json!([]));

    let (_, body) = app
        .get("/api/play_log/get?user_id=1&include_buffered=true")
        .await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["position_seconds"], 10.0);
    assert_eq!(data[0]["pending"], true);
}

#[tokio::test]
async fn test_history_resets_finished_songs() {
    let app = TestApp::new().await;
    let played_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    for (song, position) in [(1, 190.0), (2, 100.0)] {
        let record = PlayProgressRecord {
            user_id: UserId::new(1),
            song_id: SongId::new(song),
            song_name: None,
            position_seconds: position,
            duration_seconds: 200.0,
            last_touched: played_at + chrono::Duration::seconds(song),
            flush_attempts: 0,
        };
        playlog_storage::play_logs::upsert(app.durable.pool(), &record)
            .await
            .unwrap();
    }

    let (_, body) = app.get("/api/play_log/get?user_id=1").await;
    let data = body["data"].as_array().unwrap();

    assert_eq!(data[0]["song_id"], 2);
    assert_eq!(data[0]["position_seconds"], 100.0);
    assert_eq!(data[1]["song_id"], 1);
    assert_eq!(data[1]["position_seconds"], 0.0);
}

#[tokio::test]
async fn test_flush_with_store_down_returns_503() {
    let app = TestApp::new().await;
    app.store.set_available(false);

    let (status, _) = app.post_empty("/api/admin/flush").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = app.get("/api/admin/buffer").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
