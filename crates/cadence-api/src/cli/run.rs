//! CLI run subcommands: start, list, show, cancel, signal.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use cadence_core::workflow::engine::RunDetails;
use cadence_core::workflow::executor::PassReport;

use super::{short_id, status_cell};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum RunCommand {
    /// Start a run of a workflow for one contact.
    Start {
        /// Workflow ID.
        workflow_id: Uuid,

        /// Contact ID.
        #[arg(long = "contact")]
        contact_id: Uuid,
    },

    /// List recent runs.
    List {
        /// Only runs of this workflow.
        #[arg(long)]
        workflow: Option<Uuid>,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a run with its step logs.
    Show {
        run_id: Uuid,
    },

    /// Cancel a run; its pending step is never executed.
    Cancel {
        run_id: Uuid,
    },

    /// Re-check a run's waiting condition now.
    Signal {
        run_id: Uuid,
    },
}

pub async fn handle_run_command(cmd: RunCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunCommand::Start {
            workflow_id,
            contact_id,
        } => {
            let workflow = state.engine.get_workflow(workflow_id).await?;
            let report = state
                .engine
                .start_run(workflow_id, contact_id, workflow.organization_id)
                .await?;
            print_pass(&report, json)
        }
        RunCommand::List { workflow, limit } => handle_list(workflow, limit, state, json).await,
        RunCommand::Show { run_id } => {
            let details = state.engine.run_details(run_id).await?;
            print_details(&details, json)
        }
        RunCommand::Cancel { run_id } => {
            let cancelled = state.engine.cancel_run(run_id).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(
                        &serde_json::json!({ "run_id": run_id, "cancelled": cancelled })
                    )?
                );
            } else if cancelled {
                println!("  {} Cancelled run {run_id}", style("*").green().bold());
            } else {
                println!("  Run {run_id} had already ended.");
            }
            Ok(())
        }
        RunCommand::Signal { run_id } => match state.engine.signal_run(run_id).await? {
            Some(report) => print_pass(&report, json),
            None => {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(
                            &serde_json::json!({ "run_id": run_id, "resumed": false })
                        )?
                    );
                } else {
                    println!("  Run {run_id} is not waiting on a condition.");
                }
                Ok(())
            }
        },
    }
}

fn print_pass(report: &PassReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} Run {} is {}",
        style("*").green().bold(),
        style(report.run_id).cyan(),
        style(report.status.as_str()).bold()
    );
    println!("  Current step: {}", report.current_step_id);
    println!("  Steps executed: {}", report.steps_executed);
    println!();
    Ok(())
}

async fn handle_list(
    workflow: Option<Uuid>,
    limit: u32,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let runs = state.engine.list_runs(workflow.as_ref(), limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Contact"),
            Cell::new("Status"),
            Cell::new("Step"),
            Cell::new("Trigger"),
            Cell::new("Started"),
        ]);

    for r in &runs {
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            Cell::new(&r.workflow_name),
            Cell::new(short_id(&r.contact_id)),
            status_cell(r.status.as_str()),
            Cell::new(&r.current_step_id),
            Cell::new(&r.trigger_type),
            Cell::new(r.started_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn print_details(details: &RunDetails, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(details)?);
        return Ok(());
    }

    let run = &details.run;
    println!();
    println!(
        "  {} Run {}",
        style("Workflow:").bold(),
        style(run.id).cyan()
    );
    println!("  Workflow: {} ({})", style(&run.workflow_name).cyan(), run.workflow_id);
    println!("  Contact: {}", run.contact_id);
    println!("  Status: {}", run.status.as_str());
    println!("  Current step: {}", run.current_step_id);
    println!("  Trigger: {}", run.trigger_type);
    println!("  Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ended) = run.ended_at {
        println!("  Ended: {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ref err) = run.error {
        println!("  Error: {}", style(err).red());
    }
    println!();

    if details.logs.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Wait"),
            Cell::new("Due"),
            Cell::new("Error"),
        ]);

    for log in &details.logs {
        table.add_row(vec![
            Cell::new(&log.step_id),
            Cell::new(log.step_type.as_str()),
            status_cell(log.status.as_str()),
            Cell::new(log.attempt),
            Cell::new(log.wait_kind.map(|w| w.as_str()).unwrap_or("-")),
            Cell::new(
                log.next_retry_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(log.error.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}
