//! Playlog Server Library
//!
//! HTTP ingestion of playback progress, buffered in a keyed store and flushed
//! to `SQLite` on a timer.
//!
//! This library exposes the core components for testing purposes.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{BufferBackend, ServerConfig};
pub use error::{Result, ServerError};
pub use jobs::FlushScheduler;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

/// Build the application router
pub fn create_router(app_state: AppState) -> Router {
    let play_log_routes = Router::new()
        .route("/set", post(api::play_log::set_play_log))
        .route("/get", get(api::play_log::get_play_logs));

    let admin_routes = Router::new()
        .route("/flush", post(api::admin::trigger_flush))
        .route("/buffer", get(api::admin::buffer_status));

    let api_routes = Router::new()
        .route("/health", get(api::health::health))
        .nest("/play_log", play_log_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
