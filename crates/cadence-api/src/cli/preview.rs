//! `cadence preview`: render a step config against sample data.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;

use cadence_types::workflow::StepConfig;

use crate::state::AppState;

pub async fn handle_preview(
    step_file: &Path,
    sample_file: Option<&Path>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(step_file)
        .await
        .with_context(|| format!("Failed to read {}", step_file.display()))?;
    let config = parse_step(step_file, &raw)?;

    let sample = match sample_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<Value>(&raw).context("Sample context must be JSON")?
        }
        None => Value::Object(serde_json::Map::new()),
    };

    let output = state.engine.preview_step(&config, &sample);

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Preview:").bold(), output.step_type);
    if let Some(to) = &output.to {
        println!("  To: {to}");
    }
    if let Some(subject) = &output.subject {
        println!("  Subject: {subject}");
    }
    if let Some(body) = &output.body {
        println!("  Body:");
        for line in body.lines() {
            println!("    {line}");
        }
    }
    if let Some(value) = &output.value {
        println!("  Value: {value}");
    }
    if let Some(payload) = &output.payload {
        println!("  Payload: {}", serde_json::to_string_pretty(payload)?);
    }
    if let Some(result) = &output.condition_result {
        println!("  Condition: {result}");
    }
    if let Some(secs) = output.delay_secs {
        println!("  Delay: {secs}s");
    }
    if !output.missing_fields.is_empty() {
        println!(
            "  {} {}",
            style("Missing fields:").yellow(),
            output.missing_fields.join(", ")
        );
    }
    if let Some(err) = &output.error {
        println!("  {} {}", style("Error:").red(), err);
    }
    println!();
    Ok(())
}

fn parse_step(path: &Path, raw: &str) -> Result<StepConfig> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(raw).context("Invalid step JSON"),
        _ => serde_yaml_ng::from_str(raw).context("Invalid step YAML"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_by_extension() {
        let yaml = "type: wait_delay\namount: 2\nunit: hours\n";
        assert!(matches!(
            parse_step(Path::new("step.yaml"), yaml).unwrap(),
            StepConfig::WaitDelay { amount: 2, .. }
        ));

        let json = r#"{"type":"end"}"#;
        assert_eq!(parse_step(Path::new("step.json"), json).unwrap(), StepConfig::End);
        assert!(parse_step(Path::new("step.json"), yaml).is_err());
    }
}
