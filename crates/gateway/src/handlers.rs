//! Route handlers.
//!
//! Handlers translate bodies and map errors; all pool and dispatch logic
//! lives in the sandbox and remote crates.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use codemode_core::ExecutionRequest;

use crate::api::{
    ApiError, ExecuteRequest, ExecuteResponse, HealthResponse, ListFilesRequest,
    ListFilesResponse, PoolResponse, ReadFileRequest, ReadFileResponse, RunRequest, RunResponse,
    WriteFileRequest, WriteFileResponse,
};
use crate::server::AppState;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Health check handler.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.pool.stats().await;
    let status = if pool.shutting_down || pool.idle + pool.in_use == 0 {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool,
    })
}

pub async fn pool_stats(State(state): State<Arc<AppState>>) -> Json<PoolResponse> {
    Json(PoolResponse {
        stats: state.pool.stats().await,
        handles: state.pool.handles().await,
    })
}

pub async fn execute(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<ExecuteResponse> {
    let Json(payload) = payload?;
    let request = ExecutionRequest::new(payload.code, payload.language);

    let result = state.pool.execute(&request).await?;
    Ok(Json(result.into()))
}

pub async fn read_file(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ReadFileRequest>, JsonRejection>,
) -> ApiResult<ReadFileResponse> {
    let Json(payload) = payload?;
    let file = state.pool.read_file(&payload.path).await?;
    Ok(Json(ReadFileResponse {
        path: file.path,
        content: String::from_utf8_lossy(&file.content).into_owned(),
    }))
}

pub async fn write_file(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<WriteFileRequest>, JsonRejection>,
) -> ApiResult<WriteFileResponse> {
    let Json(payload) = payload?;
    let path = state
        .pool
        .write_file(&payload.path, payload.content.as_bytes())
        .await?;
    Ok(Json(WriteFileResponse {
        ok: true,
        path,
        bytes_written: payload.content.len(),
    }))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ListFilesRequest>, JsonRejection>,
) -> ApiResult<ListFilesResponse> {
    let Json(payload) = payload?;
    let listing = state.pool.list_files(payload.path.as_deref()).await?;
    Ok(Json(ListFilesResponse {
        path: listing.path,
        entries: listing.entries.iter().map(|e| e.display_name()).collect(),
    }))
}

pub async fn run_remote(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<RunResponse> {
    let Some(remote) = state.remote.as_ref() else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "remote_disabled",
            "Remote execution is not configured",
        ));
    };
    let Json(payload) = payload?;

    let output = remote.run(&payload.code).await?;
    Ok(Json(RunResponse {
        output: output.output,
        error: output.error,
    }))
}
