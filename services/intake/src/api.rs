use crate::config::ApiConfig;
use crate::envelope::RawEnvelope;
use crate::outcome::BatchReport;
use crate::pipeline::IntakePipeline;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IntakePipeline>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/invocations", post(invoke))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "intake-service"
    }))
}

/// Run one transport batch through the pipeline.
///
/// Per-record failures are part of the report, so any decodable batch
/// answers 200; only a body that is not a batch at all is a 400.
#[instrument(skip_all)]
async fn invoke(
    State(state): State<AppState>,
    payload: Result<Json<RawEnvelope>, JsonRejection>,
) -> Result<Json<BatchReport>, (StatusCode, Json<ErrorResponse>)> {
    let Json(envelope) = payload.map_err(|rejection| {
        warn!(error = %rejection, "Rejected invocation payload");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: rejection.body_text(),
                code: "INVALID_ENVELOPE".to_string(),
            }),
        )
    })?;

    let report = state.pipeline.process_envelope(&envelope).await;
    Ok(Json(report))
}

/// Start the invocation API server, returning once `shutdown` fires
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting invocation API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
