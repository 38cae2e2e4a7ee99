//! HTTP boundary of the executor service
//!
//! `POST /` takes `{"code": "..."}` and always answers
//! `200 {"result": {"success": bool, "output": string}}`; malformed bodies
//! are reported through the result as well. Concurrent executions are
//! capped with a `tower` concurrency limit, excess requests queue.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tracing::warn;

use super::{ExecutionResult, Sandbox};
use crate::metrics::{self, InFlightGuard, ERRORS_TOTAL};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// A missing field runs an empty snippet
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result: ExecutionResult,
}

#[derive(Clone)]
pub struct ExecutorState {
    pub sandbox: Arc<Sandbox>,
}

/// Build the executor router
pub fn create_router(sandbox: Arc<Sandbox>, max_concurrent: usize) -> Router {
    Router::new()
        .route(
            "/",
            post(execute).layer(ConcurrencyLimitLayer::new(max_concurrent.max(1))),
        )
        .route("/metrics", get(metrics_text))
        .with_state(ExecutorState { sandbox })
}

async fn execute(State(state): State<ExecutorState>, body: Bytes) -> Json<ExecuteResponse> {
    let _in_flight = InFlightGuard::new("execute");

    let request: ExecuteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected execution request");
            ERRORS_TOTAL.with_label_values(&["bad_request"]).inc();
            return Json(ExecuteResponse {
                result: ExecutionResult::failure(format!("Invalid request body: {}", e)),
            });
        }
    };

    let result = state.sandbox.execute(&request.code).await;
    if !result.success {
        ERRORS_TOTAL.with_label_values(&["sandbox"]).inc();
    }
    Json(ExecuteResponse { result })
}

async fn metrics_text() -> String {
    metrics::encode_metrics()
}
