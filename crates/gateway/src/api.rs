//! Request and response bodies of the HTTP API.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use codemode_core::{Error, ErrorKind, ExecutionResult, Language};
use codemode_sandbox::{HandleInfo, PoolStats};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesRequest {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub code: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Program output and infrastructure failure kept in separate fields.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            error: result.message,
            error_kind: result.error,
            truncated: result.truncated,
            duration_ms: result.duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadFileResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct WriteFileResponse {
    pub ok: bool,
    pub path: String,
    pub bytes_written: usize,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub path: String,
    /// Directories carry a trailing `/`.
    pub entries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub output: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub handles: Vec<HandleInfo>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the pool has no sandboxes to hand out.
    pub status: String,
    pub version: String,
    pub pool: PoolStats,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

// =============================================================================
// Errors
// =============================================================================

/// An error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
                retryable: false,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidRequest(_) | Error::PathEscape { .. } | Error::NotADirectory(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::FileNotFound(_) => StatusCode::NOT_FOUND,
        Error::PoolExhausted { .. } | Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        Error::EnvironmentFailure(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            tracing::warn!(error = %error, status = status.as_u16(), "Request failed");
        }
        Self {
            status,
            body: ErrorResponse {
                code: error.code().to_string(),
                message: error.to_string(),
                retryable: error.retryable(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::invalid_request("x"), StatusCode::BAD_REQUEST),
            (Error::path_escape("../x", "/workspace"), StatusCode::BAD_REQUEST),
            (Error::NotADirectory("/workspace/a".into()), StatusCode::BAD_REQUEST),
            (Error::FileNotFound("/workspace/a".into()), StatusCode::NOT_FOUND),
            (Error::PoolExhausted { waited_ms: 5 }, StatusCode::SERVICE_UNAVAILABLE),
            (Error::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (Error::environment("gone"), StatusCode::BAD_GATEWAY),
            (Error::internal("bug"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn test_exhaustion_is_retryable() {
        let err = ApiError::from(Error::PoolExhausted { waited_ms: 10 });
        assert!(err.body.retryable);
        assert_eq!(err.body.code, "pool_exhausted");
    }

    #[test]
    fn test_execute_response_separates_infrastructure_error() {
        let response = ExecuteResponse::from(ExecutionResult::timed_out(
            "partial".into(),
            String::new(),
            1000,
        ));
        assert_eq!(response.stdout, "partial");
        assert_eq!(response.exit_code, None);
        assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
        assert!(response.error.unwrap().contains("timed out"));
    }
}
