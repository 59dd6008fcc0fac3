// HTTP route handlers for the Arbiter API

use arbiter_common::redis;
use arbiter_common::types::{ExecutionRequest, JobRequest, TestCase};
use arbiter_engine::{EngineError, LanguageRegistry};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

/// Submission body. `language` stays a raw string so unknown identifiers
/// get the same 400 shape as every other rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub language: String,
    pub code: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub name: String,
    pub image: String,
    pub source_file: String,
    pub compiled: bool,
    pub memory_limit_mb: u64,
}

/// Error body: `{ "error": "...", "code": "..." }`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message,
                "code": self.code,
            })),
        )
            .into_response()
    }
}

/// Resolve the language and check request bounds before anything is queued
pub fn build_request(
    registry: &LanguageRegistry,
    payload: SubmitRequest,
) -> Result<ExecutionRequest, ApiError> {
    let profile = registry.resolve(&payload.language).map_err(|e| match e {
        EngineError::UnsupportedLanguage(name) => ApiError::bad_request(
            "UNSUPPORTED_LANGUAGE",
            format!(
                "Unsupported language '{}'. Available: {:?}",
                name,
                registry.list_languages()
            ),
        ),
        other => ApiError::internal(other.to_string()),
    })?;

    let request = ExecutionRequest {
        language: profile.language,
        code: payload.code,
        test_cases: payload.test_cases,
        time_limit_ms: payload.time_limit_ms,
        memory_limit_mb: payload.memory_limit_mb,
    };

    request
        .validate()
        .map_err(|e| ApiError::bad_request("INVALID_REQUEST", e.to_string()))?;

    Ok(request)
}

fn parse_job_id(job_id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(job_id).map_err(|_| ApiError::bad_request("INVALID_JOB_ID", "Invalid job ID format"))
}

/// POST /execute - Submit a job for execution
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|e| {
        metrics::record_rejection("MALFORMED_BODY");
        ApiError::bad_request("MALFORMED_BODY", e.body_text())
    })?;

    let request = build_request(&state.registry, payload).map_err(|e| {
        metrics::record_rejection(e.code);
        warn!(code = e.code, error = %e.message, "Submission rejected");
        e
    })?;

    let job = JobRequest::new(request);
    let job_id = job.id;

    // Push to Redis queue
    let mut conn = state.redis.clone();
    if let Err(e) = redis::push_job(&mut conn, &job).await {
        error!(job_id = %job_id, error = %e, "Failed to queue job");
        return Err(ApiError::internal(format!("Failed to queue job: {}", e)));
    }

    let language = job.request.language.to_string();
    metrics::JOBS_SUBMITTED
        .with_label_values(&[language.as_str()])
        .inc();
    info!(
        job_id = %job_id,
        language = %job.request.language,
        test_cases = job.request.test_cases.len(),
        "Job queued"
    );

    Ok((StatusCode::CREATED, Json(SubmitResponse { job_id })))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /job/{job_id} - Query execution outcome
pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_uuid = parse_job_id(&job_id)?;

    // Fetch outcome from Redis
    let mut conn = state.redis.clone();
    match redis::get_outcome(&mut conn, &job_uuid).await {
        Ok(Some(outcome)) => {
            info!(job_id = %job_uuid, status = ?outcome.status, "Job outcome retrieved");
            Ok((StatusCode::OK, Json(outcome)).into_response())
        }
        Ok(None) => Ok((
            // Not stored yet - job may still be queued or running
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "jobId": job_uuid,
                "status": "pending",
                "message": "Job is queued or still executing"
            })),
        )
            .into_response()),
        Err(e) => {
            error!(job_id = %job_uuid, error = %e, "Failed to fetch job outcome");
            Err(ApiError::internal(format!("Failed to query job status: {}", e)))
        }
    }
}

/// POST /job/{job_id}/cancel - Ask the worker to stop a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_uuid = parse_job_id(&job_id)?;

    let mut conn = state.redis.clone();
    if let Err(e) = redis::request_cancel(&mut conn, &job_uuid).await {
        error!(job_id = %job_uuid, error = %e, "Failed to set cancel flag");
        return Err(ApiError::internal(format!("Failed to cancel job: {}", e)));
    }

    info!(job_id = %job_uuid, "Cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "jobId": job_uuid,
            "status": "cancelling"
        })),
    )
        .into_response())
}

/// GET /languages - Enabled language profiles
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<LanguageInfo> = state
        .registry
        .profiles()
        .map(|profile| LanguageInfo {
            name: profile.language.to_string(),
            image: profile.image.clone(),
            source_file: profile.source_file.clone(),
            compiled: profile.needs_compile(),
            memory_limit_mb: profile.memory_limit_mb,
        })
        .collect();

    Json(languages)
}

/// GET /metrics - Prometheus text format
pub async fn metrics_handler() -> Result<String, ApiError> {
    metrics::render().map_err(ApiError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_engine::RuntimeProfile;

    fn payload(language: &str, code: &str) -> SubmitRequest {
        SubmitRequest {
            language: language.to_string(),
            code: code.to_string(),
            test_cases: vec![TestCase {
                input: "1".to_string(),
                expected_output: "1".to_string(),
            }],
            time_limit_ms: None,
            memory_limit_mb: None,
        }
    }

    #[test]
    fn test_build_request_resolves_aliases() {
        let registry = LanguageRegistry::builtin();
        let request = build_request(&registry, payload("py", "print(input())")).unwrap();
        assert_eq!(request.language.to_string(), "python");
    }

    #[test]
    fn test_unknown_language_is_bad_request() {
        let registry = LanguageRegistry::builtin();
        let err = build_request(&registry, payload("cobol", "DISPLAY 1")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "UNSUPPORTED_LANGUAGE");
        assert!(err.message.contains("cobol"));
    }

    #[test]
    fn test_disabled_language_is_bad_request() {
        let python: Vec<RuntimeProfile> = LanguageRegistry::builtin()
            .profiles()
            .filter(|p| p.language.to_string() == "python")
            .cloned()
            .collect();
        let registry = LanguageRegistry::from_profiles(python);
        let err = build_request(&registry, payload("cpp", "int main() {}")).unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_LANGUAGE");
    }

    #[test]
    fn test_validation_failure_is_bad_request() {
        let registry = LanguageRegistry::builtin();
        let mut body = payload("python", "print(1)");
        body.time_limit_ms = Some(60_000);
        let err = build_request(&registry, body).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "INVALID_REQUEST");

        let err = build_request(&registry, payload("python", "")).unwrap_err();
        assert_eq!(err.code, "INVALID_REQUEST");
    }

    #[test]
    fn test_submit_body_is_camel_case() {
        let body: SubmitRequest = serde_json::from_str(
            r#"{"language":"js","code":"x","testCases":[{"input":"","expectedOutput":"1"}],"memoryLimitMb":64}"#,
        )
        .unwrap();
        assert_eq!(body.memory_limit_mb, Some(64));
        assert_eq!(body.test_cases[0].expected_output, "1");
    }

    #[test]
    fn test_bad_job_id() {
        let err = parse_job_id("not-a-uuid").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(parse_job_id(&Uuid::new_v4().to_string()).is_ok());
    }
}
