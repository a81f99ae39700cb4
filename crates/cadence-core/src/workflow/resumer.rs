//! Resume sweep.
//!
//! `process_due_steps` is the single idempotent entry point an external
//! scheduler calls. It selects waiting step logs whose wake time has passed
//! and resumes each through the executor's optimistic claim, so any number
//! of sweeps may run at once. Per-item failures are logged and counted; they
//! never abort the batch.

use chrono::Duration;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::error::EngineError;
use super::executor::StepExecutor;
use crate::repository::workflow::WorkflowRepository;

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Due logs selected for this sweep.
    pub selected: u32,
    /// Logs this sweep claimed and drove forward.
    pub processed: u32,
    /// Lost claims and runs that ended before they could be resumed.
    pub skipped: u32,
    /// Items that failed with an unexpected error.
    pub errors: u32,
    /// Abandoned in-flight logs requeued before selection.
    pub recovered: u32,
}

/// Resume up to `limit` due step logs, `concurrency` at a time.
pub async fn process_due_steps<R: WorkflowRepository>(
    executor: &StepExecutor<R>,
    limit: u32,
    concurrency: usize,
) -> Result<SweepReport, EngineError> {
    let now = executor.runs().now();
    let due = executor.runs().repo().list_due_step_logs(now, limit).await?;

    let mut report = SweepReport {
        selected: due.len() as u32,
        ..SweepReport::default()
    };
    if due.is_empty() {
        return Ok(report);
    }

    let results: Vec<_> = stream::iter(due)
        .map(|log| async move {
            let (run_id, log_id) = (log.run_id, log.id);
            (run_id, log_id, executor.resume(log).await)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (run_id, log_id, result) in results {
        match result {
            Ok(pass) => {
                report.processed += 1;
                tracing::debug!(
                    run_id = %run_id,
                    status = %pass.status,
                    steps = pass.steps_executed,
                    "resumed run"
                );
            }
            Err(e) if e.is_skip() => {
                report.skipped += 1;
                tracing::debug!(run_id = %run_id, log_id = %log_id, reason = %e, "resume skipped");
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(run_id = %run_id, log_id = %log_id, error = %e, "resume failed");
            }
        }
    }

    tracing::info!(
        selected = report.selected,
        processed = report.processed,
        skipped = report.skipped,
        errors = report.errors,
        "sweep finished"
    );
    Ok(report)
}

/// Requeue step logs left `pending`/`running` by a worker that died.
///
/// Each log is parked as due immediately under its previous wait kind
/// (`delay` when it had none), so the next selection re-executes the same
/// attempt with the same idempotency key.
pub async fn recover_stalled_steps<R: WorkflowRepository>(
    executor: &StepExecutor<R>,
    stall_timeout: Duration,
    limit: u32,
) -> Result<u32, EngineError> {
    let runs = executor.runs();
    let now = runs.now();
    let stalled = runs
        .repo()
        .list_stalled_step_logs(now - stall_timeout, limit)
        .await?;

    let mut recovered = 0;
    for log in stalled {
        if runs.requeue(&log, now).await? {
            recovered += 1;
            tracing::warn!(
                run_id = %log.run_id,
                step_id = %log.step_id,
                attempt = log.attempt,
                "requeued abandoned step"
            );
        }
    }
    Ok(recovered)
}
