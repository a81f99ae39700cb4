//! CLI workflow definition subcommands: create, list, show, delete.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use cadence_core::workflow::definition::{load_workflow_file, serialize_workflow_yaml};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Register (or replace) a workflow from a YAML or JSON file.
    Create {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// List registered workflows.
    List {
        /// Only workflows of this organization.
        #[arg(long)]
        org: Option<Uuid>,
    },

    /// Print a workflow definition as YAML.
    Show {
        /// Workflow ID.
        id: Uuid,
    },

    /// Delete a workflow. In-flight runs finish on their snapshot.
    Delete {
        /// Workflow ID.
        id: Uuid,
    },
}

pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Create { file } => handle_create(&file, state, json).await,
        WorkflowCommand::List { org } => handle_list(org, state, json).await,
        WorkflowCommand::Show { id } => handle_show(id, state, json).await,
        WorkflowCommand::Delete { id } => handle_delete(id, state, json).await,
    }
}

async fn handle_create(file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let def = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    state.engine.save_workflow(&def).await?;

    if json {
        let out = serde_json::json!({
            "id": def.id,
            "name": def.name,
            "organization_id": def.organization_id,
            "steps": def.steps.len(),
            "triggers": def.triggers.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Saved workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!("  ID: {}", def.id);
        println!("  Organization: {}", def.organization_id);
        println!("  Steps: {}", def.steps.len());
        println!("  Triggers: {}", def.triggers.len());
        if !def.active {
            println!("  {}", style("Inactive: no new runs will start").yellow());
        }
        println!();
    }
    Ok(())
}

async fn handle_list(org: Option<Uuid>, state: &AppState, json: bool) -> Result<()> {
    let defs = state.engine.list_workflows(org.as_ref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Create one with: {}",
            style("cadence workflow create <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Active"),
            Cell::new("Steps"),
            Cell::new("Triggers"),
        ]);

    for d in &defs {
        let triggers: Vec<&str> = d.triggers.iter().map(|t| t.kind()).collect();
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(&d.name),
            if d.active {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::DarkGrey)
            },
            Cell::new(d.steps.len()),
            Cell::new(triggers.join(", ")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let def = state.engine.get_workflow(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
    } else {
        print!("{}", serialize_workflow_yaml(&def)?);
    }
    Ok(())
}

async fn handle_delete(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let deleted = state.engine.delete_workflow(id).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "id": id, "deleted": deleted }))?
        );
    } else if deleted {
        println!("  {} Deleted workflow {id}", style("*").green().bold());
    } else {
        println!("  Workflow {id} not found.");
    }
    Ok(())
}
