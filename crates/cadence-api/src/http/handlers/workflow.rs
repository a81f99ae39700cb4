//! Workflow definition handlers and explicit run starts.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use cadence_core::workflow::executor::PassReport;
use cadence_types::workflow::{WorkflowDefinition, WorkflowRun};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{RunListQuery, WorkflowListQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/workflows - Create or replace a workflow definition.
///
/// The definition is validated (including cycle detection) before storage.
pub async fn create_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<WorkflowDefinition>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let start = Instant::now();
    state.engine.save_workflow(&body).await?;

    let href = format!("/api/v1/workflows/{}", body.id);
    Ok(ApiResponse::created(body, start).with_link("self", &href))
}

/// GET /api/v1/workflows - List workflow definitions.
pub async fn list_workflows(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<WorkflowListQuery>,
) -> Result<ApiResponse<Vec<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let defs = state
        .engine
        .list_workflows(query.organization_id.as_ref())
        .await?;
    Ok(ApiResponse::success(defs, start).with_link("self", "/api/v1/workflows"))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let start = Instant::now();
    let def = state.engine.get_workflow(id).await?;
    Ok(ApiResponse::success(def, start)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("runs", &format!("/api/v1/workflows/{id}/runs")))
}

/// DELETE /api/v1/workflows/{id}
///
/// In-flight runs keep executing against their snapshot.
pub async fn delete_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    if !state.engine.delete_workflow(id).await? {
        return Err(AppError::NotFound(format!("workflow {id} not found")));
    }
    Ok(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id }),
        start,
    ))
}

/// Body of an explicit run start.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub contact_id: Uuid,
}

/// POST /api/v1/workflows/{id}/runs - Start a run for one contact.
///
/// Returns after the run's first synchronous burst.
pub async fn start_run(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(body): Json<StartRunRequest>,
) -> Result<ApiResponse<PassReport>, AppError> {
    let start = Instant::now();
    let workflow = state.engine.get_workflow(id).await?;
    let report = state
        .engine
        .start_run(id, body.contact_id, workflow.organization_id)
        .await?;
    let href = format!("/api/v1/runs/{}", report.run_id);
    Ok(ApiResponse::created(report, start).with_link("run", &href))
}

/// GET /api/v1/workflows/{id}/runs - Most recent runs of a workflow.
pub async fn list_runs(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Query(query): Query<RunListQuery>,
) -> Result<ApiResponse<Vec<WorkflowRun>>, AppError> {
    let start = Instant::now();
    let runs = state.engine.list_runs(Some(&id), query.limit).await?;
    Ok(ApiResponse::success(runs, start))
}
