//! Reading endpoints: the ingestion entry point and the consumer-facing
//! read paths.
//!
//! `POST /v1/readings` maps every orchestrator outcome onto its wire status:
//! 201 success, 202 duplicate (idempotent POST semantics: a replay is a
//! silent success, not an error), 400 validation, 422 resolution /
//! talhão-not-found, 500 unexpected processing fault. Every terminal
//! response carries the deterministic event id so clients can correlate
//! retries.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::models::{codes, IngestionOutcome, RawReadingPayload, ResolutionMethod};
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/v1/readings", post(ingest))
        .route("/v1/readings/latest", get(latest))
        .route("/v1/readings/history", get(history))
}

// ---

/// Success body for `POST /v1/readings`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    event_id: String,
    device_id: String,
    talhao_id: String,
    resolved_by: ResolutionMethod,
    timestamp: DateTime<Utc>,
}

/// Duplicate body for `POST /v1/readings`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DuplicateResponse {
    event_id: String,
    message: &'static str,
}

/// Error body shared by every non-success branch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    event_id: String,
    error_type: &'static str,
    error_code: &'static str,
    error_message: String,
}

async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<RawReadingPayload>,
) -> impl IntoResponse {
    // ---
    let event_id = payload.event_id();
    debug!("POST /v1/readings - event {event_id}");

    match state.ingestor.process_reading(payload).await {
        Ok(IngestionOutcome::Success {
            event_id,
            device_id,
            talhao_id,
            resolved_by,
            timestamp,
        }) => {
            info!("POST /v1/readings - {event_id} ingested into {talhao_id}");
            (
                StatusCode::CREATED,
                Json(IngestResponse {
                    event_id,
                    device_id,
                    talhao_id,
                    resolved_by,
                    timestamp,
                }),
            )
                .into_response()
        }
        Ok(IngestionOutcome::Duplicate { event_id }) => (
            StatusCode::ACCEPTED,
            Json(DuplicateResponse {
                event_id,
                message: "reading already processed",
            }),
        )
            .into_response(),
        Ok(IngestionOutcome::ValidationError { event_id, message }) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                event_id,
                error_type: "ValidationError",
                error_code: codes::INVALID_PAYLOAD,
                error_message: message,
            }),
        )
            .into_response(),
        Ok(IngestionOutcome::ResolutionError {
            event_id, message, ..
        }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                event_id,
                error_type: "ResolutionError",
                error_code: codes::DEVICE_NOT_FOUND,
                error_message: message,
            }),
        )
            .into_response(),
        Ok(IngestionOutcome::TalhaoNotFound {
            event_id, message, ..
        }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                event_id,
                error_type: "ResolutionError",
                error_code: codes::TALHAO_NOT_FOUND,
                error_message: message,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("POST /v1/readings - {event_id} processing failure: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    event_id,
                    error_type: "ProcessingError",
                    error_code: codes::EXCEPTION,
                    error_message: "unexpected processing failure, retry later".to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ---

/// Query parameters for the consumer read paths.
#[derive(Debug, Deserialize)]
struct TalhaoQuery {
    /// Comma-separated talhão ids, e.g. `?talhaoIds=TAL-001,TAL-002`.
    #[serde(rename = "talhaoIds")]
    talhao_ids: String,
}

impl TalhaoQuery {
    fn ids(&self) -> Vec<String> {
        self.talhao_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Handle `GET /v1/readings/latest?talhaoIds=...`
///
/// Most recent reading per requested talhão.
async fn latest(
    Query(params): Query<TalhaoQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let ids = params.ids();
    debug!("GET /v1/readings/latest - {} talhoes", ids.len());

    match state.readings.latest_per_talhao(&ids).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(err) => {
            error!("GET /v1/readings/latest failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("failed to query latest readings"),
            )
                .into_response()
        }
    }
}

/// Handle `GET /v1/readings/history?talhaoIds=...`
///
/// Hourly-averaged soil moisture over the trailing 24 hours per talhão.
async fn history(
    Query(params): Query<TalhaoQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let ids = params.ids();
    debug!("GET /v1/readings/history - {} talhoes", ids.len());

    match state.readings.hourly_moisture_history(&ids).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(err) => {
            error!("GET /v1/readings/history failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("failed to query moisture history"),
            )
                .into_response()
        }
    }
}
