//! `cadence sweep` (one pass) and `cadence worker` (scheduled passes).
//!
//! The worker registers one cron job that resumes due steps and one job per
//! schedule trigger that fans the workflow out to every contact of its
//! organization. Overlapping sweeps on the same worker are skipped; other
//! workers may sweep concurrently, the optimistic claim keeps them apart.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cadence_core::workflow::resumer::SweepReport;
use cadence_core::workflow::scheduler::{CronCallback, CronScheduler};
use cadence_types::workflow::{TriggerConfig, WorkflowDefinition};

use crate::state::AppState;

pub async fn handle_sweep(limit: Option<u32>, state: &AppState, json: bool) -> Result<()> {
    let report = state.engine.process_due_steps(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SweepReport) {
    println!();
    println!(
        "  {} Resumed {} of {} due step(s)",
        style("*").green().bold(),
        report.processed,
        report.selected
    );
    if report.recovered > 0 {
        println!("  Requeued stalled: {}", report.recovered);
    }
    if report.skipped > 0 {
        println!("  Skipped (claimed elsewhere or ended): {}", report.skipped);
    }
    if report.errors > 0 {
        println!("  {}", style(format!("Errors: {}", report.errors)).red());
    }
    println!();
}

pub async fn run_worker(schedule: &str, limit: Option<u32>, state: AppState) -> Result<()> {
    let token = CancellationToken::new();
    let scheduler = CronScheduler::new();
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;

    let sweeping = Arc::new(Mutex::new(()));
    scheduler
        .schedule_job(
            "sweep",
            schedule,
            sweep_callback(state.clone(), limit, sweeping.clone(), token.clone()),
        )
        .await
        .with_context(|| format!("Invalid sweep schedule '{schedule}'"))?;

    let workflows = state.engine.list_workflows(None).await?;
    let mut scheduled = 0usize;
    for wf in workflows.iter().filter(|w| w.active) {
        for (index, expr) in schedule_triggers(wf).into_iter().enumerate() {
            let key = format!("schedule:{}:{index}", wf.id);
            let callback = schedule_callback(state.clone(), wf.id, wf.organization_id, token.clone());
            match scheduler.schedule_job(&key, expr, callback).await {
                Ok(()) => scheduled += 1,
                Err(e) => tracing::warn!(workflow_id = %wf.id, error = %e, "schedule trigger skipped"),
            }
        }
    }

    println!(
        "  {} Worker sweeping {} ({} scheduled workflow trigger(s))",
        style("⚡").bold(),
        style(schedule).cyan(),
        scheduled
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    // Catch up immediately instead of waiting for the first tick.
    run_sweep(&state, limit, &sweeping).await;

    tokio::select! {
        _ = crate::shutdown_signal() => token.cancel(),
        _ = token.cancelled() => {}
    }

    scheduler.stop().await.context("Failed to stop scheduler")?;
    // Let an in-flight sweep finish its batch.
    let _guard = sweeping.lock().await;
    println!("\n  Worker stopped.");
    Ok(())
}

fn schedule_triggers(wf: &WorkflowDefinition) -> Vec<&str> {
    wf.triggers
        .iter()
        .filter_map(|t| match t {
            TriggerConfig::Schedule { schedule, .. } => Some(schedule.as_str()),
            _ => None,
        })
        .collect()
}

async fn run_sweep(state: &AppState, limit: Option<u32>, sweeping: &Mutex<()>) {
    let Ok(_guard) = sweeping.try_lock() else {
        tracing::debug!("previous sweep still running; tick skipped");
        return;
    };
    match state.engine.process_due_steps(limit).await {
        Ok(report) if report.selected > 0 || report.recovered > 0 => {
            tracing::info!(
                selected = report.selected,
                processed = report.processed,
                skipped = report.skipped,
                errors = report.errors,
                recovered = report.recovered,
                "sweep finished"
            );
        }
        Ok(_) => tracing::trace!("nothing due"),
        Err(e) => tracing::error!(error = %e, "sweep failed"),
    }
}

fn sweep_callback(
    state: AppState,
    limit: Option<u32>,
    sweeping: Arc<Mutex<()>>,
    token: CancellationToken,
) -> CronCallback {
    Arc::new(move |_at: DateTime<Utc>| {
        let state = state.clone();
        let sweeping = sweeping.clone();
        let token = token.clone();
        async move {
            if token.is_cancelled() {
                return;
            }
            run_sweep(&state, limit, &sweeping).await;
        }
        .boxed()
    })
}

fn schedule_callback(
    state: AppState,
    workflow_id: Uuid,
    organization_id: Uuid,
    token: CancellationToken,
) -> CronCallback {
    Arc::new(move |at: DateTime<Utc>| {
        let state = state.clone();
        let token = token.clone();
        async move {
            if token.is_cancelled() {
                return;
            }
            let contacts = match state.contacts.list_contact_ids(&organization_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(%workflow_id, error = %e, "failed to list contacts");
                    return;
                }
            };
            match state.engine.fire_schedule(workflow_id, &contacts, at).await {
                Ok(runs) => {
                    let started = runs.iter().filter(|r| !r.duplicate).count();
                    tracing::info!(%workflow_id, contacts = contacts.len(), started, "schedule fired");
                }
                Err(e) => tracing::error!(%workflow_id, error = %e, "schedule failed"),
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::workflow::{StepConfig, StepDefinition};
    use std::collections::BTreeMap;

    #[test]
    fn test_schedule_triggers_are_collected() {
        let wf = WorkflowDefinition {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            name: "Digest".into(),
            description: None,
            active: true,
            entry_step_id: "done".into(),
            triggers: vec![
                TriggerConfig::Schedule {
                    schedule: "every day at 09:00".into(),
                    when: None,
                },
                TriggerConfig::TagAdded {
                    tag: "vip".into(),
                    when: None,
                },
            ],
            steps: vec![StepDefinition {
                id: "done".into(),
                name: None,
                config: StepConfig::End,
                next: None,
                branches: BTreeMap::new(),
                default_next: None,
                retry: None,
                timeout_secs: None,
            }],
            metadata: None,
        };
        assert_eq!(schedule_triggers(&wf), vec!["every day at 09:00"]);
    }
}
