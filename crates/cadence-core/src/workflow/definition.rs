//! Workflow definition parsing and validation.
//!
//! Converts between YAML/JSON documents and `WorkflowDefinition`, and
//! validates structural constraints before a definition is stored: unique
//! step ids, resolvable successors, branch shape, expressions, trigger
//! schedules and an acyclic graph.

use std::collections::HashSet;
use std::path::Path;

use cadence_types::workflow::{StepConfig, TriggerConfig, WorkflowDefinition};
use thiserror::Error;

use super::dag::{unreachable_steps, validate_step_graph};
use super::scheduler::normalize_schedule;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a workflow definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reachable step graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A successor or the entry step references an unknown step.
    #[error("unknown step: {0}")]
    UnknownStep(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Load a workflow definition from a `.json`, `.yaml` or `.yml` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and at least one step exists
/// - All step IDs are unique and non-empty
/// - Branch steps declare labeled successors; only branch steps do
/// - Expressions and message bodies are non-empty, delays fit in a duration
/// - Trigger schedules normalize to cron expressions
/// - Every successor resolves and the reachable graph is acyclic
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step id must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &def.steps {
        let is_branch = matches!(step.config, StepConfig::BranchOnCondition { .. });
        if is_branch && step.branches.is_empty() && step.default_next.is_none() {
            return Err(WorkflowError::ValidationError(format!(
                "branch step '{}' has no labeled successors",
                step.id
            )));
        }
        if is_branch && step.next.is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "branch step '{}' must use branches/default_next, not next",
                step.id
            )));
        }
        if !is_branch && (!step.branches.is_empty() || step.default_next.is_some()) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' declares branches but is not a branch step",
                step.id
            )));
        }
        if matches!(step.config, StepConfig::End) && step.next.is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "end step '{}' must not have a successor",
                step.id
            )));
        }
        if step.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' timeout must be > 0",
                step.id
            )));
        }
        if let Some(retry) = &step.retry {
            if retry.max_attempts == 0 || retry.multiplier < 1.0 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' retry needs max_attempts >= 1 and multiplier >= 1",
                    step.id
                )));
            }
        }
        validate_step_config(&step.id, &step.config)?;
    }

    for trigger in &def.triggers {
        if let TriggerConfig::Schedule { schedule, .. } = trigger {
            normalize_schedule(schedule)
                .map_err(|e| WorkflowError::ValidationError(e.to_string()))?;
        }
    }

    validate_step_graph(def)?;

    let orphans = unreachable_steps(def)?;
    if !orphans.is_empty() {
        tracing::warn!(workflow = %def.name, ?orphans, "workflow has unreachable steps");
    }

    Ok(())
}

fn validate_step_config(step_id: &str, config: &StepConfig) -> Result<(), WorkflowError> {
    let invalid = |msg: &str| -> Result<(), WorkflowError> {
        Err(WorkflowError::ValidationError(format!(
            "step '{step_id}': {msg}"
        )))
    };
    match config {
        StepConfig::SendMessage { body, .. } if body.trim().is_empty() => {
            invalid("message body must not be empty")
        }
        StepConfig::WaitDelay { amount, unit } if unit.duration(*amount).is_none() => {
            invalid("delay is too large")
        }
        StepConfig::WaitUntilCondition { condition, .. } if condition.trim().is_empty() => {
            invalid("condition must not be empty")
        }
        StepConfig::WaitUntilCondition {
            check_every_secs: Some(0),
            ..
        } => invalid("check_every_secs must be > 0"),
        StepConfig::BranchOnCondition { expression } if expression.trim().is_empty() => {
            invalid("expression must not be empty")
        }
        StepConfig::MutateContactField { field, .. } if field.trim().is_empty() => {
            invalid("field name must not be empty")
        }
        StepConfig::InvokeExternalAction { action, .. } if action.trim().is_empty() => {
            invalid("action name must not be empty")
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
