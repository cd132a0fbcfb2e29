//! HTTP boundary.
//!
//! | Route                    | Method  | Body                           |
//! |--------------------------|---------|--------------------------------|
//! | `/sandbox-execute`       | POST    | `ExecutionRequest` → report    |
//! | `/verify`                | POST    | request + loop position → verdict |
//! | `/health`                | GET     | `ok`                           |
//! | any                      | OPTIONS | empty, CORS headers            |

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use verifier_common::{ExecutionLog, ExecutionReport};

use crate::config::VerifierConfig;
use crate::errors::VerifyError;
use crate::policy::{PolicyContext, TaskStatus};
use crate::validate::ValidationError;
use crate::verification::VerificationReport;
use crate::verifier::Verifier;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub verifier: Verifier,
    /// Iteration budget used when `/verify` callers send none
    pub max_budget: u32,
    pub max_body_bytes: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self {
            verifier: Verifier::from_config(config),
            max_budget: config.max_budget(),
            max_body_bytes: config.max_body_bytes(),
        }
    }
}

// ── Error type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    InvalidJson,
    Validation(Vec<ValidationError>),
    Internal {
        message: String,
        logs: Vec<ExecutionLog>,
    },
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        let logs = err.logs().to_vec();
        ApiError::Internal {
            message: err.to_string(),
            logs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidJson => (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": "Invalid JSON in request body"})),
            )
                .into_response(),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "message": "Validation failed",
                    "errors": errors,
                })),
            )
                .into_response(),
            // Same keys as a report so callers can always read it as one.
            ApiError::Internal { message, logs } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "exitCode": -1,
                    "message": message,
                    "logs": logs,
                    "testResults": [],
                    "securityFindings": [],
                    "lintViolations": [],
                    "durationMs": 0,
                    "resourceUsage": {"peakMemoryMb": 0, "cpuTimeMs": 0},
                })),
            )
                .into_response(),
        }
    }
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub report: ExecutionReport,
    pub verification: VerificationReport,
    pub next_status: TaskStatus,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/sandbox-execute", post(sandbox_execute).options(preflight))
        .route("/verify", post(verify).options(preflight))
        .route("/health", get(health).options(preflight))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn fallback(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Rejected request with malformed JSON");
        ApiError::InvalidJson
    })
}

async fn sandbox_execute(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<ExecutionReport>, ApiError> {
    let value = parse_body(&body)?;
    let request = state.verifier.validator().validate(&value).map_err(|errors| {
        warn!(errors = errors.len(), "Rejected invalid execution request");
        ApiError::Validation(errors)
    })?;

    let report = state.verifier.execute(&request).await.inspect_err(|e| {
        error!(error = %e, task_id = %request.task_id, "Execution failed");
    })?;
    Ok(Json(report))
}

async fn verify(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<VerifyResponse>, ApiError> {
    let value = parse_body(&body)?;

    let mut errors = Vec::new();
    let iteration_count = loop_field(&value, "iterationCount", 0, &mut errors);
    let max_budget = loop_field(&value, "maxBudget", state.max_budget, &mut errors);
    let task_status = match value.get("taskStatus") {
        None | Some(Value::Null) => TaskStatus::Verifying,
        Some(Value::String(s)) => s.parse().unwrap_or_else(|e: String| {
            errors.push(ValidationError::new("taskStatus", e));
            TaskStatus::Verifying
        }),
        Some(_) => {
            errors.push(ValidationError::new("taskStatus", "taskStatus must be a string"));
            TaskStatus::Verifying
        }
    };

    let request = match state.verifier.validator().validate(&value) {
        Ok(request) if errors.is_empty() => request,
        Ok(_) => return Err(ApiError::Validation(errors)),
        Err(mut request_errors) => {
            request_errors.append(&mut errors);
            warn!(errors = request_errors.len(), "Rejected invalid verify request");
            return Err(ApiError::Validation(request_errors));
        }
    };

    let outcome = state
        .verifier
        .verify(&request, PolicyContext::new(iteration_count, max_budget))
        .await
        .inspect_err(|e| {
            error!(error = %e, task_id = %request.task_id, "Verification failed");
        })?;
    let next_status = task_status.next(outcome.verification.output.verdict.is_pass());

    Ok(Json(VerifyResponse {
        report: outcome.report,
        verification: outcome.verification,
        next_status,
    }))
}

/// Optional non-negative integer field of a `/verify` body.
fn loop_field(value: &Value, field: &str, default: u32, errors: &mut Vec<ValidationError>) -> u32 {
    match value.get(field) {
        None | Some(Value::Null) => default,
        Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            None => {
                errors.push(ValidationError::new(
                    field,
                    format!("{} must be a non-negative integer", field),
                ));
                default
            }
        },
    }
}

// ── Server ────────────────────────────────────────────────────────────

/// Start the verifier service and serve until Ctrl+C.
pub async fn start_server(config: &VerifierConfig) -> Result<()> {
    let state = Arc::new(AppState::from_config(config));
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        sandbox = %config.sandbox_mode(),
        max_budget = config.max_budget(),
        "Verifier listening"
    );
    println!("Verifier running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;
    use crate::sandbox::{SandboxExecutor, SandboxOutput};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use crate::validate::MAX_REQUEST_BYTES;
    use verifier_common::ExecutionRequest;

    fn state(verifier: Verifier) -> SharedState {
        Arc::new(AppState {
            verifier,
            max_budget: 5,
            max_body_bytes: MAX_REQUEST_BYTES,
        })
    }

    fn test_router() -> Router {
        build_router(state(Verifier::default()))
    }

    fn valid_request() -> Value {
        json!({
            "taskId": "task-1",
            "subtaskId": "sub-1",
            "agentRole": "python_agent",
            "artifacts": [
                {
                    "filename": "app.py",
                    "content": "def add(a, b):\n    return a + b\n",
                    "type": "source"
                },
                {
                    "filename": "test_app.py",
                    "content": "def test_add():\n    assert add(1, 2) == 3\n",
                    "type": "test"
                }
            ],
            "testCommand": "pytest -q",
            "config": {"runner": "python"}
        })
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_options_returns_empty_ok_with_cors() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/sandbox-execute")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_browser_preflight_is_answered() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/sandbox-execute")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn test_health() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let resp = test_router()
            .oneshot(post("/sandbox-execute", "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Invalid JSON in request body");
    }

    #[tokio::test]
    async fn test_empty_object_lists_every_missing_field() {
        let resp = test_router()
            .oneshot(post("/sandbox-execute", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Validation failed");
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        for field in ["taskId", "subtaskId", "agentRole", "artifacts", "testCommand", "config"] {
            assert!(fields.contains(&field), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn test_valid_request_returns_report() {
        let resp = test_router()
            .oneshot(post("/sandbox-execute", valid_request().to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let body = body_json(resp).await;
        assert_eq!(body["taskId"], "task-1");
        assert_eq!(body["subtaskId"], "sub-1");
        assert_eq!(body["status"], "success");
        assert_eq!(body["exitCode"], 0);
        assert_eq!(body["testResults"][0]["name"], "test_add");
        assert_eq!(body["resourceUsage"]["peakMemoryMb"], 200);
        assert!(body["logs"].as_array().unwrap().len() > 3);
    }

    #[tokio::test]
    async fn test_multi_megabyte_request_is_accepted() {
        // 150k short lines, just under the per-artifact content limit
        let content = "x = 1\n".repeat(150_000);
        let mut request = valid_request();
        request["artifacts"] = json!([
            {"filename": "a.py", "content": content, "type": "source"},
            {"filename": "b.py", "content": content, "type": "source"},
            {"filename": "c.py", "content": content, "type": "source"},
        ]);
        let body = request.to_string();
        assert!(body.len() > 2 * 1024 * 1024);

        let resp = test_router()
            .oneshot(post("/sandbox-execute", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["lintViolations"], json!([]));
    }

    #[tokio::test]
    async fn test_secret_and_eval_fail_the_report() {
        let mut request = valid_request();
        request["artifacts"][0]["content"] =
            json!("api_key = 'sk-12345'\nresult = eval(input())\n");
        let resp = test_router()
            .oneshot(post("/sandbox-execute", request.to_string()))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["status"], "failure");
        assert_eq!(body["exitCode"], 1);
        let types: Vec<&str> = body["securityFindings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["DANGEROUS_FUNCTION", "HARDCODED_SECRET"]);
    }

    #[tokio::test]
    async fn test_verify_returns_verdict_and_next_status() {
        let mut request = valid_request();
        request["artifacts"][1]["content"] = json!("def test_should_fail():\n    pass\n");
        request["iterationCount"] = json!(2);
        let resp = test_router()
            .oneshot(post("/verify", request.to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["report"]["status"], "failure");
        let output = &body["verification"]["output"];
        assert_eq!(output["verdict"], "FAIL");
        assert_eq!(output["failure_category"], "LOGIC");
        assert_eq!(output["target_agent"], "python_agent");
        assert_eq!(output["retry_recommended"], true);
        assert_eq!(output["budget_remaining"], 3);
        assert_eq!(body["nextStatus"], "REPAIRING");
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_loop_fields_with_request_errors() {
        let mut request = valid_request();
        request["taskId"] = json!("");
        request["iterationCount"] = json!(-1);
        request["taskStatus"] = json!("DANCING");
        let resp = test_router()
            .oneshot(post("/verify", request.to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["taskId", "iterationCount", "taskStatus"]);
    }

    struct BrokenExecutor;

    #[async_trait]
    impl SandboxExecutor for BrokenExecutor {
        async fn execute(&self, req: &ExecutionRequest) -> Result<SandboxOutput, SandboxError> {
            Err(SandboxError::SpawnFailed {
                command: req.test_command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no shell"),
            })
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_internal_error_returns_best_effort_report() {
        let app = build_router(state(
            Verifier::default().with_executor(Arc::new(BrokenExecutor)),
        ));
        let resp = app
            .oneshot(post("/sandbox-execute", valid_request().to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["exitCode"], -1);
        assert!(body["message"].as_str().unwrap().contains("pytest -q"));
        assert!(!body["logs"].as_array().unwrap().is_empty());
        assert_eq!(body["testResults"], json!([]));
        assert_eq!(body["durationMs"], 0);
        assert_eq!(body["resourceUsage"], json!({"peakMemoryMb": 0, "cpuTimeMs": 0}));
    }
}
