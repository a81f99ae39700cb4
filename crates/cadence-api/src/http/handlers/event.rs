//! Trigger events, the resume sweep and step preview.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use cadence_core::workflow::engine::TriggeredRun;
use cadence_core::workflow::preview::PreviewOutput;
use cadence_core::workflow::resumer::SweepReport;
use cadence_types::workflow::{StepConfig, TriggerEvent};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::SweepQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/events - Deliver a CRM event to matching workflows.
///
/// Redelivering the same event reports the existing runs with
/// `duplicate: true` instead of starting new ones.
pub async fn post_event(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(event): Json<TriggerEvent>,
) -> Result<ApiResponse<Vec<TriggeredRun>>, AppError> {
    let start = Instant::now();
    let triggered = state.engine.handle_event(&event).await?;
    tracing::debug!(
        kind = event.kind.as_str(),
        contact_id = %event.contact_id,
        runs = triggered.len(),
        "event handled"
    );
    Ok(ApiResponse::success(triggered, start))
}

/// POST /api/v1/sweep - Run one resume sweep.
pub async fn sweep(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<SweepQuery>,
) -> Result<ApiResponse<SweepReport>, AppError> {
    let start = Instant::now();
    let report = state.engine.process_due_steps(query.limit).await?;
    Ok(ApiResponse::success(report, start))
}

/// Body of a preview request.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub step: StepConfig,
    /// Sample merge context (`contact`, `organization`, ...).
    #[serde(default)]
    pub sample: Value,
}

/// POST /api/v1/preview - Render a step against sample data.
pub async fn preview(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<PreviewRequest>,
) -> Result<ApiResponse<PreviewOutput>, AppError> {
    let start = Instant::now();
    let output = state.engine.preview_step(&body.step, &body.sample);
    Ok(ApiResponse::success(output, start))
}
