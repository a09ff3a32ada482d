//! HTTP surface for the statistical-evaluation service (§6).
//!
//! Grounded on clarium's `server.rs`: an axum `Router` over a cloneable
//! `AppState`, started with `axum::serve` over a `TcpListener`. The
//! difference from clarium's own server is scope — no sessions, no
//! websockets, no pgwire sidecar; four routes front a pure computational
//! core instead of a stateful store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

pub mod collaborator;
pub mod schema;

use crate::error::AppError;
use crate::experiment::DataCollaborator;
use crate::json_numeric::to_string_preserving_non_finite;
use crate::metrics_registry::METRICS;
use crate::worker_pool::WorkerPool;

/// Shared server state injected into all handlers (§6 "process-wide state").
#[derive(Clone)]
pub struct AppState {
    pub collaborator: Arc<dyn DataCollaborator + Send + Sync>,
    pub worker_pool: WorkerPool,
    /// §10.3 `EPSTATS_DEFAULT_CONFIDENCE_LEVEL`, used when a request doesn't
    /// set its own `confidence_level`.
    pub default_confidence_level: f64,
}

/// Wraps a `Serialize` payload so the body is written through
/// `json_numeric`'s NaN/±Infinity-preserving encoder instead of the default
/// `axum::Json` extractor, which would otherwise collapse those values to
/// `null` (§6).
struct PreservingJson<T>(T);

impl<T: Serialize> IntoResponse for PreservingJson<T> {
    fn into_response(self) -> Response {
        match to_string_preserving_non_finite(&self.0) {
            Ok(body) => {
                let mut response = body.into_response();
                response
                    .headers_mut()
                    .insert(axum::http::header::CONTENT_TYPE, "application/json".parse().unwrap());
                response
            }
            Err(e) => {
                error!(error = %e, "failed to serialize response body");
                AppError::evaluation(format!("response serialization failed: {e}")).into_response()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "ok" }))
}

async fn metrics_handler() -> impl IntoResponse {
    let body = METRICS.encode_text();
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn evaluate_handler(
    State(state): State<AppState>,
    Json(req): Json<schema::EvaluateRequest>,
) -> Result<PreservingJson<schema::EvaluateResponse>, AppError> {
    METRICS.evaluation_requests_total.inc();

    let experiment = schema::parse_evaluate_request(req, state.default_confidence_level)?;
    let exp_id = experiment.id.clone();
    let span = info_span!("evaluate", exp_id = %exp_id);

    async move {
        let collaborator = state.collaborator.clone();
        let started = Instant::now();
        let result = state
            .worker_pool
            .run(move || crate::experiment::evaluate(experiment, collaborator.as_ref()))
            .await;
        METRICS.evaluation_duration_seconds.observe(started.elapsed().as_secs_f64());

        match result {
            Ok(eval) => {
                METRICS.evaluation_successes_total.inc();
                info!("evaluation succeeded");
                Ok(PreservingJson(schema::evaluation_to_response(eval)))
            }
            Err(e) => {
                METRICS.evaluation_errors_total.inc();
                error!(error = %e, "evaluation failed");
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn sample_size_handler(
    State(state): State<AppState>,
    Json(req): Json<schema::SampleSizeRequest>,
) -> Result<PreservingJson<schema::SampleSizeResponse>, AppError> {
    let n = schema::compute_sample_size(&req, state.default_confidence_level)?;
    Ok(PreservingJson(schema::SampleSizeResponse { sample_size_per_variant: n.into() }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/evaluate", post(evaluate_handler))
        .route("/sample-size-calculation", post(sample_size_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Start the HTTP server bound to `http_port`, wired with `collaborator` and a
/// worker pool of `worker_pool_size` slots (§5).
pub async fn run(
    http_port: u16,
    worker_pool_size: usize,
    collaborator: Arc<dyn DataCollaborator + Send + Sync>,
    default_confidence_level: f64,
) -> anyhow::Result<()> {
    let state = AppState {
        collaborator,
        worker_pool: WorkerPool::new(worker_pool_size),
        default_confidence_level,
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    info!(target: "epstats", "binding HTTP listener on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "HTTP server exited with error");
        return Err(e.into());
    }
    Ok(())
}
