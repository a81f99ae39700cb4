//! `cadence event`: deliver one CRM event from a JSON file or stdin.

use std::io::Read;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};

use cadence_types::workflow::TriggerEvent;

use super::{short_id, status_cell};
use crate::state::AppState;

pub async fn handle_event(file: &str, state: &AppState, json: bool) -> Result<()> {
    let raw = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {file}"))?
    };
    let event: TriggerEvent = serde_json::from_str(&raw).context("Invalid event JSON")?;

    let triggered = state.engine.handle_event(&event).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&triggered)?);
        return Ok(());
    }

    if triggered.is_empty() {
        println!();
        println!("  No workflow matched this {} event.", event.kind.as_str());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Run ID"),
            Cell::new("Status"),
            Cell::new("Duplicate"),
        ]);
    for t in &triggered {
        table.add_row(vec![
            Cell::new(short_id(&t.workflow_id)),
            Cell::new(t.run_id),
            status_cell(t.status.as_str()),
            Cell::new(if t.duplicate { "yes" } else { "" }),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}
