//! HTTP API.
//!
//! - POST /ask     — stream an answer as Server-Sent Events
//! - GET  /health  — liveness probe

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::provider::ProviderClient;
use crate::server::cors::build_cors_layer;
use crate::server::streaming::StreamRelay;
use crate::telemetry::{Run, RunTracker, TraceReporter};

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn ProviderClient>,
    pub reporter: Arc<dyn TraceReporter>,
}

/// Build the axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/ask", post(ask))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Prompt submission.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body for rejected requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Request rejected before any provider call.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),

    #[error("question must not be empty")]
    EmptyQuestion,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidBody(rejection) => rejection.status(),
            ApiError::EmptyQuestion => StatusCode::UNPROCESSABLE_ENTITY,
        };
        warn!(status = status.as_u16(), "Rejected request: {self}");
        (
            status,
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn ask(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    if req.question.trim().is_empty() {
        return Err(ApiError::EmptyQuestion);
    }

    let request_id = Uuid::new_v4().to_string();
    let provider_config = &state.config.provider;

    info!(
        request_id = request_id,
        model = provider_config.model,
        question_chars = req.question.len(),
        "Ask request"
    );

    let run = Run::new(
        req.question.clone(),
        provider_config.model.clone(),
        state.provider.provider_name(),
        provider_config.temperature,
    );
    let tracker = RunTracker::start(state.reporter.clone(), run);

    let relay = StreamRelay::new(
        request_id,
        state.provider.clone(),
        provider_config.model.clone(),
        req.question,
        tracker,
        state.config.server.stream_idle_timeout,
    );

    let sse = Sse::new(relay.into_sse_stream()).keep_alive(KeepAlive::default());
    Ok(([("x-accel-buffering", "no")], sse))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
