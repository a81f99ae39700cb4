//! Workflow domain types for the automation engine.
//!
//! A workflow is a directed graph of typed steps keyed by stable string ids.
//! The step id doubles as the persistent program counter of a run: it is what
//! [`WorkflowRun::current_step_id`] and [`WorkflowStepLog::step_id`] store.
//!
//! Runs execute one workflow against one contact. Every execution attempt of a
//! step is recorded as a [`WorkflowStepLog`]; suspension is plain data
//! (`status = waiting` plus `next_retry_at`), never an in-memory task.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// A complete workflow owned by one organization.
///
/// Authored as YAML or JSON. Steps form an acyclic graph rooted at
/// `entry_step_id`; successors are referenced by step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inactive workflows accept no new runs; in-flight runs continue.
    #[serde(default = "default_active")]
    pub active: bool,
    pub entry_step_id: String,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    /// Look up a step by its stable id.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn entry_step(&self) -> Option<&StepDefinition> {
        self.step(&self.entry_step_id)
    }
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable identifier, unique within the workflow. Never reuse an id with
    /// different semantics: in-flight runs hold it as their position.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub config: StepConfig,
    /// Successor for linear steps. `None` ends the run after this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Labeled successors for `branch_on_condition` steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, String>,
    /// Fallback successor when no branch label matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,
    /// Overrides the per-step-type retry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Overrides the engine-wide action timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StepDefinition {
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Every step id this step can transition to.
    pub fn successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(next) = &self.next {
            out.push(next);
        }
        out.extend(self.branches.values().map(String::as_str));
        if let Some(default_next) = &self.default_next {
            out.push(default_next);
        }
        if let StepConfig::WaitUntilCondition {
            timeout_next: Some(timeout_next),
            ..
        } = &self.config
        {
            out.push(timeout_next);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Step types
// ---------------------------------------------------------------------------

/// The closed set of step types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    SendMessage,
    WaitDelay,
    WaitUntilCondition,
    BranchOnCondition,
    MutateContactField,
    InvokeExternalAction,
    End,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::SendMessage => "send_message",
            StepType::WaitDelay => "wait_delay",
            StepType::WaitUntilCondition => "wait_until_condition",
            StepType::BranchOnCondition => "branch_on_condition",
            StepType::MutateContactField => "mutate_contact_field",
            StepType::InvokeExternalAction => "invoke_external_action",
            StepType::End => "end",
        }
    }

    /// Whether the step calls out to an external collaborator.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            StepType::SendMessage | StepType::MutateContactField | StepType::InvokeExternalAction
        )
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(StepType::SendMessage),
            "wait_delay" => Ok(StepType::WaitDelay),
            "wait_until_condition" => Ok(StepType::WaitUntilCondition),
            "branch_on_condition" => Ok(StepType::BranchOnCondition),
            "mutate_contact_field" => Ok(StepType::MutateContactField),
            "invoke_external_action" => Ok(StepType::InvokeExternalAction),
            "end" => Ok(StepType::End),
            other => Err(format!("unknown step type: {other}")),
        }
    }
}

/// Type-specific step configuration.
///
/// String fields that reach a contact or a collaborator (subject, body,
/// field value, string leaves of an action payload) accept merge fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    SendMessage {
        channel: MessageChannel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        body: String,
        /// Recipient override; defaults to the contact's address for the channel.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    WaitDelay {
        amount: u64,
        #[serde(default)]
        unit: DelayUnit,
    },
    WaitUntilCondition {
        /// JEXL expression over the merge context.
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check_every_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
        /// Successor taken when the wait times out; `next` otherwise.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_next: Option<String>,
    },
    BranchOnCondition {
        /// JEXL expression whose value selects the branch label.
        expression: String,
    },
    MutateContactField {
        field: String,
        value: String,
    },
    InvokeExternalAction {
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    End,
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::SendMessage { .. } => StepType::SendMessage,
            StepConfig::WaitDelay { .. } => StepType::WaitDelay,
            StepConfig::WaitUntilCondition { .. } => StepType::WaitUntilCondition,
            StepConfig::BranchOnCondition { .. } => StepType::BranchOnCondition,
            StepConfig::MutateContactField { .. } => StepType::MutateContactField,
            StepConfig::InvokeExternalAction { .. } => StepType::InvokeExternalAction,
            StepConfig::End => StepType::End,
        }
    }
}

/// Delivery channel of a `send_message` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Email,
    Sms,
}

impl MessageChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageChannel::Email => "email",
            MessageChannel::Sms => "sms",
        }
    }
}

/// Unit of a `wait_delay` amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    /// Convert `amount` of this unit into a duration, `None` on overflow.
    pub fn duration(&self, amount: u64) -> Option<Duration> {
        let per_unit: u64 = match self {
            DelayUnit::Seconds => 1,
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 3_600,
            DelayUnit::Days => 86_400,
        };
        let secs = amount.checked_mul(per_unit)?;
        Duration::try_seconds(i64::try_from(secs).ok()?)
    }
}

/// Bounded exponential backoff for retryable step failures.
///
/// The wait before retry `n` (1-based count of failed attempts) is
/// `base_delay_secs * multiplier^(n-1)`, capped at `max_delay_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    60
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> u64 {
    3_600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Conditions under which a workflow starts a run for a contact.
///
/// Every variant accepts an optional JEXL `when` guard evaluated against the
/// event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    StageEntered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pipeline_id: Option<String>,
        stage_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    FormSubmitted {
        form_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    TagAdded {
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Cron expression or human schedule ("every day at 09:00").
    Schedule {
        schedule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
}

impl TriggerConfig {
    pub fn when_clause(&self) -> Option<&str> {
        match self {
            TriggerConfig::Manual { when }
            | TriggerConfig::StageEntered { when, .. }
            | TriggerConfig::FormSubmitted { when, .. }
            | TriggerConfig::TagAdded { when, .. }
            | TriggerConfig::Schedule { when, .. } => when.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerConfig::Manual { .. } => "manual",
            TriggerConfig::StageEntered { .. } => "stage_entered",
            TriggerConfig::FormSubmitted { .. } => "form_submitted",
            TriggerConfig::TagAdded { .. } => "tag_added",
            TriggerConfig::Schedule { .. } => "schedule",
        }
    }
}

/// An inbound signal that may start runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: TriggerEventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// What happened to the contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEventKind {
    /// Explicit request to start one workflow.
    Manual { workflow_id: Uuid },
    StageEntered {
        #[serde(default)]
        pipeline_id: Option<String>,
        stage_id: String,
    },
    FormSubmitted { form_id: String },
    TagAdded { tag: String },
    /// A workflow's schedule fired for this contact.
    ScheduleTick { workflow_id: Uuid },
}

impl TriggerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEventKind::Manual { .. } => "manual",
            TriggerEventKind::StageEntered { .. } => "stage_entered",
            TriggerEventKind::FormSubmitted { .. } => "form_submitted",
            TriggerEventKind::TagAdded { .. } => "tag_added",
            TriggerEventKind::ScheduleTick { .. } => "schedule",
        }
    }
}

/// Decision to start a run, produced by trigger evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIntent {
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub trigger_type: String,
    /// Natural de-duplication key for this trigger occurrence.
    pub trigger_key: String,
    #[serde(default)]
    pub trigger_payload: serde_json::Value,
}

/// Natural key of a trigger occurrence: workflow + contact + occurrence time.
pub fn trigger_key(workflow_id: Uuid, contact_id: Uuid, occurred_at: DateTime<Utc>) -> String {
    format!(
        "{workflow_id}:{contact_id}:{}",
        occurred_at.timestamp_millis()
    )
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "waiting" => Ok(RunStatus::Waiting),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One execution of a workflow against a single contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub status: RunStatus,
    /// Step the run is positioned at; matches the open step log.
    pub current_step_id: String,
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_payload: Option<serde_json::Value>,
    /// Definition captured at creation; the executor only navigates this.
    pub snapshot: WorkflowDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Step logs
// ---------------------------------------------------------------------------

/// Status of a single step execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLogStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Skipped,
}

impl StepLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepLogStatus::Pending => "pending",
            StepLogStatus::Running => "running",
            StepLogStatus::Waiting => "waiting",
            StepLogStatus::Completed => "completed",
            StepLogStatus::Failed => "failed",
            StepLogStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepLogStatus::Completed | StepLogStatus::Failed | StepLogStatus::Skipped
        )
    }
}

impl fmt::Display for StepLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepLogStatus::Pending),
            "running" => Ok(StepLogStatus::Running),
            "waiting" => Ok(StepLogStatus::Waiting),
            "completed" => Ok(StepLogStatus::Completed),
            "failed" => Ok(StepLogStatus::Failed),
            "skipped" => Ok(StepLogStatus::Skipped),
            other => Err(format!("unknown step log status: {other}")),
        }
    }
}

/// Why a step log is waiting, which decides how it is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Entered after a delay; resume executes the step. The step's wait
    /// clock starts when the log is claimed.
    Delay,
    /// A delay with nothing after it; resume completes the run.
    Finish,
    /// A retryable failure; resume closes this attempt and opens the next.
    Retry,
    /// A condition wait re-check; resume re-evaluates on the same log.
    Condition,
    /// Step budget for one pass exhausted; resume continues immediately.
    Yield,
}

impl WaitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Delay => "delay",
            WaitKind::Finish => "finish",
            WaitKind::Retry => "retry",
            WaitKind::Condition => "condition",
            WaitKind::Yield => "yield",
        }
    }
}

impl FromStr for WaitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delay" => Ok(WaitKind::Delay),
            "finish" => Ok(WaitKind::Finish),
            "retry" => Ok(WaitKind::Retry),
            "condition" => Ok(WaitKind::Condition),
            "yield" => Ok(WaitKind::Yield),
            other => Err(format!("unknown wait kind: {other}")),
        }
    }
}

/// Persisted record of one execution attempt of a step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub step_type: StepType,
    pub status: StepLogStatus,
    /// 1-based attempt number of this step within the run.
    pub attempt: u32,
    /// Key handed to side-effecting collaborators for this attempt.
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_kind: Option<WaitKind>,
    /// Populated exactly while `status` is `waiting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time a worker took ownership of this log (start or claim).
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStepLog {
    /// A fresh `pending` log for `step` in `run_id`.
    pub fn pending(run_id: Uuid, step: &StepDefinition, attempt: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            step_id: step.id.clone(),
            step_type: step.step_type(),
            status: StepLogStatus::Pending,
            attempt,
            idempotency_key: idempotency_key(run_id, &step.id, attempt),
            wait_kind: None,
            next_retry_at: None,
            output: None,
            error: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Idempotency key derived from `(run_id, step_id, attempt)`.
pub fn idempotency_key(run_id: Uuid, step_id: &str, attempt: u32) -> String {
    format!("{run_id}-{step_id}-{attempt}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
organization_id: 0190a1b2-0000-7000-8000-000000000001
name: Welcome series
entry_step_id: greet
triggers:
  - type: stage_entered
    stage_id: lead
  - type: form_submitted
    form_id: newsletter
    when: "payload.source == 'landing'"
steps:
  - id: greet
    config:
      type: send_message
      channel: email
      subject: "Welcome {{ contact.first_name }}"
      body: "Hi {{ contact.first_name | \"there\" }}!"
    next: pause
  - id: pause
    config:
      type: wait_delay
      amount: 2
      unit: days
    next: check
  - id: check
    config:
      type: branch_on_condition
      expression: "contact.custom_fields.plan == 'pro'"
    branches:
      "true": done
    default_next: done
  - id: done
    config:
      type: end
"#
    }

    #[test]
    fn test_definition_parses_from_yaml() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(sample_yaml()).unwrap();
        assert_eq!(def.name, "Welcome series");
        assert!(def.active);
        assert_eq!(def.steps.len(), 4);
        assert_eq!(def.triggers.len(), 2);
        assert_eq!(def.entry_step().unwrap().step_type(), StepType::SendMessage);

        let pause = def.step("pause").unwrap();
        assert_eq!(
            pause.config,
            StepConfig::WaitDelay {
                amount: 2,
                unit: DelayUnit::Days
            }
        );
        assert_eq!(def.step("check").unwrap().branches["true"], "done");
        assert_eq!(def.step("done").unwrap().config, StepConfig::End);
    }

    #[test]
    fn test_definition_json_roundtrip() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(sample_yaml()).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }

    #[test]
    fn test_successors_cover_all_edges() {
        let step = StepDefinition {
            id: "wait".to_string(),
            name: None,
            config: StepConfig::WaitUntilCondition {
                condition: "contact.tags|length > 0".to_string(),
                check_every_secs: None,
                timeout_secs: Some(60),
                timeout_next: Some("timeout".to_string()),
            },
            next: Some("after".to_string()),
            branches: BTreeMap::new(),
            default_next: None,
            retry: None,
            timeout_secs: None,
        };
        assert_eq!(step.successors(), vec!["after", "timeout"]);
    }

    #[test]
    fn test_step_type_string_roundtrip() {
        for t in [
            StepType::SendMessage,
            StepType::WaitDelay,
            StepType::WaitUntilCondition,
            StepType::BranchOnCondition,
            StepType::MutateContactField,
            StepType::InvokeExternalAction,
            StepType::End,
        ] {
            assert_eq!(t.as_str().parse::<StepType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!("loop".parse::<StepType>().is_err());
    }

    #[test]
    fn test_delay_unit_duration() {
        assert_eq!(DelayUnit::Hours.duration(1), Some(Duration::hours(1)));
        assert_eq!(DelayUnit::Days.duration(2), Some(Duration::days(2)));
        assert_eq!(DelayUnit::Seconds.duration(0), Some(Duration::zero()));
        assert_eq!(DelayUnit::Days.duration(u64::MAX), None);
    }

    #[test]
    fn test_retry_config_defaults() {
        let cfg: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RetryConfig::default());
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay_secs, 60);
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert_eq!("waiting".parse::<RunStatus>().unwrap(), RunStatus::Waiting);
    }

    #[test]
    fn test_step_log_status_terminal() {
        assert!(StepLogStatus::Skipped.is_terminal());
        assert!(!StepLogStatus::Waiting.is_terminal());
        assert_eq!(
            "skipped".parse::<StepLogStatus>().unwrap(),
            StepLogStatus::Skipped
        );
    }

    #[test]
    fn test_pending_log_carries_idempotency_key() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(sample_yaml()).unwrap();
        let run_id = Uuid::now_v7();
        let log = WorkflowStepLog::pending(run_id, def.entry_step().unwrap(), 2, Utc::now());
        assert_eq!(log.status, StepLogStatus::Pending);
        assert_eq!(log.idempotency_key, format!("{run_id}-greet-2"));
        assert!(log.next_retry_at.is_none());
    }

    #[test]
    fn test_trigger_event_kind_tagging() {
        let json = r#"{"type":"tag_added","tag":"vip"}"#;
        let kind: TriggerEventKind = serde_json::from_str(json).unwrap();
        assert_eq!(
            kind,
            TriggerEventKind::TagAdded {
                tag: "vip".to_string()
            }
        );
        assert_eq!(kind.as_str(), "tag_added");
    }

    #[test]
    fn test_trigger_key_is_stable() {
        let wf = Uuid::now_v7();
        let contact = Uuid::now_v7();
        let at = Utc::now();
        assert_eq!(trigger_key(wf, contact, at), trigger_key(wf, contact, at));
        assert_ne!(
            trigger_key(wf, contact, at),
            trigger_key(wf, contact, at + Duration::milliseconds(1))
        );
    }
}
