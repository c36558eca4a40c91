//! Control API route handlers.
//!
//! All endpoints return JSON. The engine is shared via `Arc<Engine>`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::engine::{Engine, EngineStatus, TickReport};
use crate::types::{EngineError, Opportunity, Position};

pub type AppState = Arc<Engine>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

/// Maps engine errors onto HTTP status codes.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            EngineError::PolicyViolation(r) => (StatusCode::BAD_REQUEST, r.label()),
            EngineError::SourceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "source_unavailable"),
            EngineError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(engine): State<AppState>) -> Json<EngineStatus> {
    Json(engine.status().await)
}

/// GET /api/positions
pub async fn get_positions(State(engine): State<AppState>) -> Json<Vec<Position>> {
    Json(engine.open_positions().await)
}

/// GET /api/history
pub async fn get_history(State(engine): State<AppState>) -> Json<Vec<Position>> {
    Json(engine.history().await)
}

/// POST /api/positions — manual entry.
pub async fn post_position(
    State(engine): State<AppState>,
    Json(opportunity): Json<Opportunity>,
) -> Result<(StatusCode, Json<Position>), ApiError> {
    let position = engine.manual_entry(opportunity).await?;
    Ok((StatusCode::CREATED, Json(position)))
}

/// POST /api/start
pub async fn post_start(State(engine): State<AppState>) -> Json<EngineStatus> {
    engine.start().await;
    Json(engine.status().await)
}

/// POST /api/stop
pub async fn post_stop(State(engine): State<AppState>) -> Json<EngineStatus> {
    engine.stop().await;
    Json(engine.status().await)
}

/// POST /api/tick — run one cycle now.
pub async fn post_tick(State(engine): State<AppState>) -> Result<Json<TickReport>, ApiError> {
    Ok(Json(engine.run_tick().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
