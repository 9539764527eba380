//! Route handlers and server setup.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::budget::CostReport;
use crate::jobs::{JobPayload, PipelineContext, Scheduler, SubmitOutcome};

use super::types::{ApiErrorBody, EventsQuery, HealthResponse, SubmitResponse};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<PipelineContext>,
    pub scheduler: Arc<Scheduler>,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ApiErrorBody { error: self.1 })).into_response()
    }
}

impl<E: std::error::Error> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate", post(submit_job))
        .route("/api/budget", get(budget_status))
        .route("/api/costs", get(cost_report))
        .route("/api/costs/events", get(cost_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<JobPayload>,
) -> Json<SubmitResponse> {
    match state.scheduler.submit(payload) {
        SubmitOutcome::Enqueued(job_id) => Json(SubmitResponse {
            status: "enqueued",
            job_id: Some(job_id),
        }),
        SubmitOutcome::Duplicate => Json(SubmitResponse {
            status: "duplicate",
            job_id: None,
        }),
    }
}

async fn budget_status(State(state): State<AppState>) -> Response {
    Json(state.ctx.governor.status()).into_response()
}

async fn cost_report(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report = CostReport::build(&state.ctx.ledger, &state.ctx.governor, 7)?;
    Ok(Json(report).into_response())
}

async fn cost_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let events = state.ctx.ledger.recent_events(query.limit.min(500))?;
    Ok(Json(events).into_response())
}
