//! Device administration read path.
//!
//! `GET /v1/devices/mapping` returns the full active device→talhão mapping,
//! for debugging and fleet inspection. Reads straight from the device
//! directory, never from the cache, so the answer is authoritative.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use tracing::error;

use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/v1/devices/mapping", get(mapping))
}

async fn mapping(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.devices.list_active_mappings().await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(err) => {
            error!("GET /v1/devices/mapping failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("failed to query device mappings"),
            )
                .into_response()
        }
    }
}
