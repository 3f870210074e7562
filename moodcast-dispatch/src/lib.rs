//! moodcast-dispatch library
//!
//! Mood-to-music dispatch: a chat user picks a mood (or sends a selfie whose
//! emotion picks it), a random track from that mood's folder in a remote
//! repository is returned, and the selection is appended to a CSV log in
//! the same repository.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod bridge;
pub mod error;
pub mod services;
pub mod store;

pub use bridge::{ChatBridge, Delivery};
pub use error::{ApiError, ApiResult};
pub use services::{DispatchOrchestrator, DispatchResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<ChatBridge>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Largest accepted photo upload in bytes
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(bridge: Arc<ChatBridge>, orchestrator: Arc<DispatchOrchestrator>, max_upload_bytes: usize) -> Self {
        Self {
            bridge,
            orchestrator,
            startup_time: Utc::now(),
            max_upload_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .merge(api::dispatch_routes())
        .merge(api::health_routes())
        .fallback(api::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
