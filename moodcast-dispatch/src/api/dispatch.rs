//! Chat event endpoints
//!
//! A chat front-end forwards button presses and photos here and relays the
//! returned [`Delivery`] to the user.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use moodcast_common::{MoodButton, MoodKey};
use serde::{Deserialize, Serialize};

use crate::bridge::Delivery;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/mood body
#[derive(Debug, Deserialize)]
pub struct MoodRequest {
    pub chat_id: i64,
    pub user: String,
    /// Button id or mood name
    pub mood: String,
}

/// POST /api/photo query string
#[derive(Debug, Deserialize)]
pub struct PhotoParams {
    pub chat_id: i64,
    pub user: String,
}

/// DELETE /api/cache query string
#[derive(Debug, Deserialize)]
pub struct CacheParams {
    /// Only drop this mood's listing
    pub mood: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub cleared: usize,
}

/// GET /
pub async fn index() -> &'static str {
    concat!("moodcast-dispatch ", env!("CARGO_PKG_VERSION"), "\n")
}

/// GET /api/moods
pub async fn list_moods(State(state): State<AppState>) -> Json<Vec<MoodButton>> {
    Json(state.bridge.buttons().to_vec())
}

/// POST /api/mood
pub async fn select_mood(
    State(state): State<AppState>,
    payload: Result<Json<MoodRequest>, JsonRejection>,
) -> ApiResult<Json<Delivery>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let user = required_user(&request.user)?;

    let delivery = state
        .bridge
        .on_mood_button(&request.mood, request.chat_id, user)
        .await;
    Ok(Json(delivery))
}

/// POST /api/photo?chat_id=..&user=..
pub async fn upload_photo(
    State(state): State<AppState>,
    params: Result<Query<PhotoParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<Delivery>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let user = required_user(&params.user)?;
    let body = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!("photo exceeds {} bytes", state.max_upload_bytes))
        } else {
            ApiError::BadRequest(e.body_text())
        }
    })?;

    let delivery = state.bridge.on_photo(body.to_vec(), params.chat_id, user).await;
    Ok(Json(delivery))
}

/// DELETE /api/cache[?mood=..]
pub async fn clear_cache(
    State(state): State<AppState>,
    params: Result<Query<CacheParams>, QueryRejection>,
) -> ApiResult<Json<CacheClearResponse>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let catalog = state.orchestrator.catalog();
    let cleared = match params.mood {
        Some(mood) => {
            let mood: MoodKey = mood.parse()?;
            usize::from(catalog.invalidate(mood).await)
        }
        None => catalog.clear().await,
    };

    tracing::info!(cleared, "Track catalog cache cleared");
    Ok(Json(CacheClearResponse { cleared }))
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such endpoint".to_string())
}

fn required_user(user: &str) -> ApiResult<&str> {
    let user = user.trim();
    if user.is_empty() {
        return Err(ApiError::BadRequest("user must not be empty".to_string()));
    }
    Ok(user)
}

/// Build chat event routes
pub fn dispatch_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/api/moods", get(list_moods))
        .route("/api/mood", post(select_mood))
        .route("/api/photo", post(upload_photo))
        .route("/api/cache", delete(clear_cache))
}
