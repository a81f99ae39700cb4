//! Run inspection and control handlers.

use std::time::Instant;

use axum::extract::{Path, State};
use serde_json::json;
use uuid::Uuid;

use cadence_core::workflow::engine::RunDetails;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/runs/{id} - A run with its step logs.
pub async fn get_run(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<RunDetails>, AppError> {
    let start = Instant::now();
    let details = state.engine.run_details(id).await?;
    let workflow_href = format!("/api/v1/workflows/{}", details.run.workflow_id);
    Ok(ApiResponse::success(details, start)
        .with_link("self", &format!("/api/v1/runs/{id}"))
        .with_link("workflow", &workflow_href))
}

/// POST /api/v1/runs/{id}/cancel
///
/// `cancelled` is false when the run had already ended.
pub async fn cancel_run(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let cancelled = state.engine.cancel_run(id).await?;
    Ok(ApiResponse::success(
        json!({ "run_id": id, "cancelled": cancelled }),
        start,
    ))
}

/// POST /api/v1/runs/{id}/signal - Re-check a waiting condition now.
///
/// `resumed` is false when the run was not waiting on a condition or
/// another worker claimed it first.
pub async fn signal_run(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let report = state.engine.signal_run(id).await?;
    let body = match report {
        Some(r) => json!({
            "run_id": id,
            "resumed": true,
            "status": r.status,
            "current_step_id": r.current_step_id,
            "steps_executed": r.steps_executed,
        }),
        None => json!({ "run_id": id, "resumed": false }),
    };
    Ok(ApiResponse::success(body, start))
}
