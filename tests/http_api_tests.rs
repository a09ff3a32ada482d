//! HTTP surface tests (§6): bind the real axum router to an ephemeral
//! loopback port and drive it with a `reqwest` client, the same
//! bind-ephemeral-then-connect-a-real-client shape clarium's own
//! `tests/pgwire_mock_tests.rs` uses for its pgwire integration tests.

use std::sync::Arc;

use epstats::error::AppError;
use epstats::experiment::DataCollaborator;
use epstats::model::Experiment;
use epstats::server::{self, AppState};
use epstats::table::AggregatedGoalRow;
use epstats::worker_pool::WorkerPool;

struct EmptyDataCollaborator;

impl DataCollaborator for EmptyDataCollaborator {
    fn get_agg_goals(&self, _experiment: &Experiment) -> Result<Vec<AggregatedGoalRow>, AppError> {
        Ok(Vec::new())
    }
}

async fn spawn_server() -> (tokio::task::JoinHandle<()>, String) {
    let state = AppState {
        collaborator: Arc::new(EmptyDataCollaborator),
        worker_pool: WorkerPool::new(2),
        default_confidence_level: epstats::stats::DEFAULT_CONFIDENCE_LEVEL,
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (handle, format!("http://{addr}"))
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (handle, base) = spawn_server().await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "ok");
    handle.abort();
}

#[tokio::test]
async fn evaluate_rejects_empty_id_with_422() {
    let (handle, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "id": "",
        "control_variant": "a",
        "unit_type": "T",
        "metrics": [],
        "checks": [],
    });
    let resp = client.post(format!("{base}/evaluate")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    handle.abort();
}

#[tokio::test]
async fn evaluate_rejects_unparseable_expression_with_422() {
    let (handle, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "id": "exp",
        "control_variant": "a",
        "unit_type": "T",
        "metrics": [{"id": "m1", "name": "m1", "nominator": "foo(x.unit.y)", "denominator": "count(T.global.exposure)"}],
        "checks": [],
    });
    let resp = client.post(format!("{base}/evaluate")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    handle.abort();
}

#[tokio::test]
async fn evaluate_with_no_collaborator_rows_still_returns_200() {
    let (handle, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "id": "exp",
        "control_variant": "a",
        "unit_type": "T",
        "variants": ["a", "b"],
        "metrics": [{"id": "ctr", "name": "CTR", "nominator": "count(T.global.click)", "denominator": "count(T.global.exposure)"}],
        "checks": [],
    });
    let resp = client.post(format!("{base}/evaluate")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let text = resp.text().await.unwrap();
    // NaN from 0/0 division must survive literally on the wire (§6), not collapse to `null`.
    assert!(text.contains("NaN"));
    handle.abort();
}

#[tokio::test]
async fn sample_size_calculation_bernoulli_form() {
    let (handle, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "n_variants": 2,
        "minimum_effect": 0.05,
        "mean": 0.4,
    });
    let resp = client.post(format!("{base}/sample-size-calculation")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let value: serde_json::Value = resp.json().await.unwrap();
    let n = value["sample_size_per_variant"].as_f64().unwrap();
    assert!((n - 9490.0).abs() / 9490.0 < 0.02);
    handle.abort();
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let (handle, base) = spawn_server().await;
    let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let text = resp.text().await.unwrap();
    assert!(text.contains("evaluation_requests_total"));
    handle.abort();
}
