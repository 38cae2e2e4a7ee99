//! HTTP gateway in front of the agent loop
//!
//! Routes:
//!
//! ```text
//! GET  /                          health check
//! POST /generate                  {prompt, thread_id?} → {content, success, thread_id}
//! POST /threads/:thread_id/reset  forget a conversation
//! GET  /metrics                   Prometheus text exposition
//! ```
//!
//! Errors are always JSON `{"error": ...}`; 500 responses carry a
//! `details` field only in development.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentController, AgentError};
use crate::metrics::{self, InFlightGuard, ERRORS_TOTAL};
use crate::security::{RateLimitError, RateLimiter};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub prompt: String,
    /// Conversation to continue; a new one is started when absent
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub content: String,
    pub success: bool,
    pub thread_id: String,
}

/// Error type for the gateway, rendered as a JSON response
#[derive(Debug)]
pub enum GatewayError {
    BadRequest(String),
    RateLimited(RateLimitError),
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            GatewayError::RateLimited(e) => write!(f, "{}", e),
            GatewayError::Internal { message, .. } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<RateLimitError> for GatewayError {
    fn from(e: RateLimitError) -> Self {
        GatewayError::RateLimited(e)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            GatewayError::RateLimited(e) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "Rate limit exceeded" })),
                )
                    .into_response();
                let secs = e.retry_after.as_secs_f64().ceil().max(1.0) as u64;
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            GatewayError::Internal { message, details } => {
                let body = match details {
                    Some(details) => json!({ "error": message, "details": details }),
                    None => json!({ "error": message }),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// Turn handling shared by all requests
pub struct Gateway {
    agent: Arc<AgentController>,
    limiter: RateLimiter,
    development: bool,
}

impl Gateway {
    pub fn new(agent: Arc<AgentController>, limiter: RateLimiter, development: bool) -> Self {
        Self {
            agent,
            limiter,
            development,
        }
    }

    pub fn agent(&self) -> &Arc<AgentController> {
        &self.agent
    }

    /// Validate, admit and run one turn
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResponse, GatewayError> {
        if request.prompt.trim().is_empty() {
            ERRORS_TOTAL.with_label_values(&["bad_request"]).inc();
            return Err(GatewayError::BadRequest("Prompt is required".to_string()));
        }

        if let Err(e) = self.limiter.check() {
            ERRORS_TOTAL.with_label_values(&["rate_limited"]).inc();
            warn!(retry_after_ms = e.retry_after.as_millis() as u64, "Turn rate limited");
            return Err(e.into());
        }

        let thread_id = request
            .thread_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        match self.agent.run(&thread_id, &request.prompt).await {
            Ok(reply) => {
                info!(thread_id = %thread_id, trace_id = %reply.trace_id, "Turn answered");
                Ok(TurnResponse {
                    content: reply.content,
                    success: true,
                    thread_id,
                })
            }
            Err(AgentError::EmptyPrompt) => {
                Err(GatewayError::BadRequest("Prompt is required".to_string()))
            }
            Err(e) => {
                let kind = match &e {
                    AgentError::ToolLoopExceeded { .. } => "tool_loop",
                    _ => "model",
                };
                ERRORS_TOTAL.with_label_values(&[kind]).inc();
                Err(GatewayError::Internal {
                    message: e.to_string(),
                    details: self.development.then(|| format!("{:?}", e)),
                })
            }
        }
    }

    /// Forget a thread's history once its running turn, if any, is done;
    /// true if there was one
    pub async fn reset_thread(&self, thread_id: &str) -> bool {
        self.agent.memory().reset_after_turn(thread_id).await
    }
}

/// Create the gateway router
pub fn create_router(gateway: Arc<Gateway>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/generate", post(generate))
        .route("/threads/:thread_id/reset", post(reset_thread))
        .route("/metrics", get(metrics_text))
        .layer(cors)
        .with_state(gateway)
}

async fn health() -> &'static str {
    "Hello World!"
}

async fn generate(
    State(gateway): State<Arc<Gateway>>,
    body: Bytes,
) -> Result<Json<TurnResponse>, GatewayError> {
    let _in_flight = InFlightGuard::new("generate");

    let request: TurnRequest = if body.is_empty() {
        TurnRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ERRORS_TOTAL.with_label_values(&["bad_request"]).inc();
            GatewayError::BadRequest(format!("Invalid request body: {}", e))
        })?
    };

    gateway.handle_turn(request).await.map(Json)
}

async fn reset_thread(
    State(gateway): State<Arc<Gateway>>,
    Path(thread_id): Path<String>,
) -> Json<serde_json::Value> {
    let reset = gateway.reset_thread(&thread_id).await;
    Json(json!({ "thread_id": thread_id, "reset": reset }))
}

async fn metrics_text() -> String {
    metrics::encode_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::llm::{ChatModel, ModelError, ModelReply};
    use crate::memory::{MemoryStore, Turn};
    use crate::tools::{ToolCatalog, ToolSpec};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Answers with the number of turns it was shown, or fails on "fail"
    struct CountingModel;

    #[async_trait]
    impl ChatModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(
            &self,
            _system: &str,
            history: &[Turn],
            _tools: &[ToolSpec],
        ) -> Result<ModelReply, ModelError> {
            match history.last() {
                Some(turn) if turn.content == "fail" => Err(ModelError::fatal("test", "invalid x-api-key")),
                _ => Ok(ModelReply::text(format!("seen {} turns", history.len()))),
            }
        }
    }

    fn gateway(burst: u64, development: bool) -> Arc<Gateway> {
        let agent = AgentController::new(
            Arc::new(CountingModel),
            ToolCatalog::new(),
            Arc::new(MemoryStore::default()),
            AgentConfig::default(),
        );
        Arc::new(Gateway::new(
            Arc::new(agent),
            RateLimiter::new(burst, 0.001),
            development,
        ))
    }

    async fn post_json(router: Router, uri: &str, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn router(gateway: Arc<Gateway>) -> Router {
        create_router(gateway, CorsLayer::new())
    }

    #[tokio::test]
    async fn test_empty_prompt_is_400() {
        for body in [r#"{"prompt": ""}"#, r#"{"prompt": "   "}"#, r#"{"thread_id": "t"}"#, ""] {
            let (status, json) = post_json(router(gateway(5, false)), "/generate", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json, json!({"error": "Prompt is required"}));
        }
    }

    #[tokio::test]
    async fn test_generate_success_shape() {
        let (status, json) = post_json(
            router(gateway(5, false)),
            "/generate",
            r#"{"prompt": "hi", "thread_id": "t1"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"content": "seen 1 turns", "success": true, "thread_id": "t1"}));
    }

    #[tokio::test]
    async fn test_thread_memory_and_reset() {
        let gateway = gateway(10, false);
        let turn = |prompt: &str| TurnRequest {
            prompt: prompt.to_string(),
            thread_id: Some("t1".to_string()),
        };

        gateway.handle_turn(turn("one")).await.unwrap();
        let second = gateway.handle_turn(turn("two")).await.unwrap();
        // user, assistant, user
        assert_eq!(second.content, "seen 3 turns");

        let (status, json) = post_json(router(gateway.clone()), "/threads/t1/reset", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"thread_id": "t1", "reset": true}));

        let third = gateway.handle_turn(turn("three")).await.unwrap();
        assert_eq!(third.content, "seen 1 turns");
    }

    #[tokio::test]
    async fn test_missing_thread_id_mints_one() {
        let gateway = gateway(5, false);
        let first = gateway
            .handle_turn(TurnRequest { prompt: "hi".into(), thread_id: None })
            .await
            .unwrap();
        let second = gateway
            .handle_turn(TurnRequest { prompt: "hi".into(), thread_id: None })
            .await
            .unwrap();
        assert_ne!(first.thread_id, second.thread_id);
        assert_eq!(second.content, "seen 1 turns");
    }

    #[tokio::test]
    async fn test_model_failure_is_500() {
        let (status, json) =
            post_json(router(gateway(5, false)), "/generate", r#"{"prompt": "fail"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Model error: test error: invalid x-api-key");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn test_development_includes_details() {
        let (status, json) =
            post_json(router(gateway(5, true)), "/generate", r#"{"prompt": "fail"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["details"].as_str().unwrap().contains("Model"));
    }

    #[tokio::test]
    async fn test_rate_limited_is_429() {
        let gateway = gateway(1, false);
        let (status, _) = post_json(router(gateway.clone()), "/generate", r#"{"prompt": "a"}"#).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = post_json(router(gateway), "/generate", r#"{"prompt": "b"}"#).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json, json!({"error": "Rate limit exceeded"}));
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(gateway(1, false))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Hello World!");
    }
}
