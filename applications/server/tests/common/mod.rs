//! Common test utilities and fixtures
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use playlog_core::MemoryStore;
use playlog_server::{create_router, AppState, ServerConfig};
use playlog_storage::SqlitePlayLogStore;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

/// A router over an in-memory buffer and a real on-disk `SQLite` file
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub durable: Arc<SqlitePlayLogStore>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_url = format!("sqlite://{}", temp_dir.path().join("test.db").display());

        let pool = playlog_storage::create_pool(&db_url)
            .await
            .expect("Failed to create pool");
        playlog_storage::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let store = Arc::new(MemoryStore::new());
        let durable = Arc::new(SqlitePlayLogStore::new(pool));
        let state = AppState::new(config, store.clone(), durable.clone());

        Self {
            router: create_router(state.clone()),
            state,
            store,
            durable,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and decode the JSON body
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(body).unwrap()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// Configuration that treats every buffered record as stale
pub fn eager_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.flush.staleness_threshold_seconds = 0;
    config
}
