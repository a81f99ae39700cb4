//! Step runner for the seven workflow step types.
//!
//! `StepRunner` dispatches on the `StepConfig` variant. Each handler resolves
//! merge fields against the run's context, performs the step's effect through
//! the collaborators, and reports a [`StepOutcome`]. The runner never touches
//! persistence; the executor turns outcomes into run transitions.

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use cadence_types::contact::Contact;
use cadence_types::workflow::{
    DelayUnit, MessageChannel, StepConfig, StepDefinition, WorkflowRun, WorkflowStepLog,
};

use super::action::{ActionError, ActionRequest, Collaborators, FieldUpdate, OutboundMessage};
use super::expression::{ConditionEvaluator, ExpressionError};
use super::merge::{resolve, resolve_json, resolve_with, EscapeMode, MergeContext};

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// What a step handler decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Done; continue with `next` (`None` ends the run).
    Advance { next: Option<String>, output: Value },
    /// Nothing to do for this contact; continue with `next`.
    Skip { next: Option<String>, reason: String },
    /// Done; enter `next` no earlier than `wake_at`.
    Delay {
        next: Option<String>,
        wake_at: DateTime<Utc>,
        output: Value,
    },
    /// Not done yet; re-run this same attempt at `wake_at`.
    Wait { wake_at: DateTime<Utc>, output: Value },
    /// Continue with the successor labeled `label`.
    Branch { label: String, output: Value },
    Fail { error: String, retryable: bool },
    End { output: Value },
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual steps by dispatching to type-specific handlers.
#[derive(Clone)]
pub struct StepRunner {
    collaborators: Collaborators,
    /// Default bound for collaborator calls.
    action_timeout_secs: u64,
    /// Default re-check interval for condition waits.
    condition_check_interval_secs: u64,
}

impl StepRunner {
    pub fn new(
        collaborators: Collaborators,
        action_timeout_secs: u64,
        condition_check_interval_secs: u64,
    ) -> Self {
        Self {
            collaborators,
            action_timeout_secs,
            condition_check_interval_secs,
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Execute `step` for `run` as the attempt recorded by `log`.
    pub async fn run(
        &self,
        run: &WorkflowRun,
        step: &StepDefinition,
        log: &WorkflowStepLog,
        now: DateTime<Utc>,
    ) -> StepOutcome {
        tracing::debug!(
            run_id = %run.id,
            step_id = %step.id,
            step_type = %step.step_type(),
            attempt = log.attempt,
            "executing step"
        );

        match self.dispatch(run, step, log, now).await {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::Fail {
                error: format!("loading contact: {e}"),
                retryable: e.is_retryable(),
            },
        }
    }

    /// `Err` only when the run's contact or organization could not be loaded.
    async fn dispatch(
        &self,
        run: &WorkflowRun,
        step: &StepDefinition,
        log: &WorkflowStepLog,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, ActionError> {
        let timeout_secs = step.timeout_secs.unwrap_or(self.action_timeout_secs);

        let outcome = match &step.config {
            StepConfig::WaitDelay { amount, unit } => delay(step, *amount, unit, now),
            StepConfig::End => StepOutcome::End { output: json!({}) },
            StepConfig::SendMessage {
                channel,
                subject,
                body,
                to,
            } => {
                let loaded = self.load_subject(run, timeout_secs, now).await?;
                self.send_message(
                    run,
                    step,
                    log,
                    &loaded,
                    MessageParts {
                        channel: *channel,
                        subject: subject.as_deref(),
                        body,
                        to: to.as_deref(),
                    },
                    timeout_secs,
                )
                .await
            }
            StepConfig::WaitUntilCondition {
                condition,
                check_every_secs,
                timeout_secs: wait_timeout,
                timeout_next,
            } => {
                let loaded = self.load_subject(run, timeout_secs, now).await?;
                wait_until(
                    step,
                    log,
                    &loaded.ctx,
                    condition,
                    check_every_secs.unwrap_or(self.condition_check_interval_secs),
                    *wait_timeout,
                    timeout_next.as_deref(),
                    now,
                )
            }
            StepConfig::BranchOnCondition { expression } => {
                let loaded = self.load_subject(run, timeout_secs, now).await?;
                branch(&loaded.ctx, expression)
            }
            StepConfig::MutateContactField { field, value } => {
                let loaded = self.load_subject(run, timeout_secs, now).await?;
                let update = FieldUpdate {
                    organization_id: run.organization_id,
                    contact_id: run.contact_id,
                    field: field.clone(),
                    value: resolve(value, &loaded.ctx),
                    idempotency_key: log.idempotency_key.clone(),
                };
                let result = with_timeout(
                    timeout_secs,
                    self.collaborators.contacts.update_field_boxed(&update),
                )
                .await;
                match result {
                    Ok(()) => StepOutcome::Advance {
                        next: step.next.clone(),
                        output: json!({ "field": update.field, "value": update.value }),
                    },
                    Err(e) => failure(e),
                }
            }
            StepConfig::InvokeExternalAction { action, payload } => {
                let loaded = self.load_subject(run, timeout_secs, now).await?;
                let request = ActionRequest {
                    organization_id: run.organization_id,
                    contact_id: run.contact_id,
                    run_id: run.id,
                    action: action.clone(),
                    payload: resolve_json(payload, &loaded.ctx),
                    idempotency_key: log.idempotency_key.clone(),
                };
                let result = with_timeout(
                    timeout_secs,
                    self.collaborators.actions.invoke_boxed(&request),
                )
                .await;
                match result {
                    Ok(response) => StepOutcome::Advance {
                        next: step.next.clone(),
                        output: json!({ "action": request.action, "response": response }),
                    },
                    Err(e) => failure(e),
                }
            }
        };
        Ok(outcome)
    }

    /// Fetch the run's contact and organization and build its merge context.
    async fn load_subject(
        &self,
        run: &WorkflowRun,
        timeout_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Subject, ActionError> {
        let contacts = &self.collaborators.contacts;
        let contact = with_timeout(
            timeout_secs,
            contacts.get_contact_boxed(&run.organization_id, &run.contact_id),
        )
        .await?;
        let organization = with_timeout(
            timeout_secs,
            contacts.get_organization_boxed(&run.organization_id),
        )
        .await?;
        let ctx = MergeContext::for_run(run, contact.as_ref(), organization.as_ref(), now);
        Ok(Subject { contact, ctx })
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_message(
        &self,
        run: &WorkflowRun,
        step: &StepDefinition,
        log: &WorkflowStepLog,
        subject: &Subject,
        parts: MessageParts<'_>,
        timeout_secs: u64,
    ) -> StepOutcome {
        let ctx = &subject.ctx;
        let recipient = match parts.to {
            Some(template) => Some(resolve_with(template, ctx, EscapeMode::SingleLine)),
            None => subject.contact.as_ref().and_then(|c| match parts.channel {
                MessageChannel::Email => c.email.clone(),
                MessageChannel::Sms => c.phone.clone(),
            }),
        }
        .map(|to| to.trim().to_string())
        .filter(|to| !to.is_empty());

        let Some(to) = recipient else {
            return StepOutcome::Skip {
                next: step.next.clone(),
                reason: format!("contact has no {} address", parts.channel.as_str()),
            };
        };

        let body_mode = if parts.channel == MessageChannel::Email && looks_like_html(parts.body) {
            EscapeMode::Html
        } else {
            EscapeMode::Plain
        };
        let message = OutboundMessage {
            organization_id: run.organization_id,
            contact_id: run.contact_id,
            run_id: run.id,
            channel: parts.channel,
            to,
            subject: parts
                .subject
                .map(|s| resolve_with(s, ctx, EscapeMode::SingleLine)),
            body: resolve_with(parts.body, ctx, body_mode),
            idempotency_key: log.idempotency_key.clone(),
        };

        match with_timeout(timeout_secs, self.collaborators.messages.send_boxed(&message)).await {
            Ok(receipt) => StepOutcome::Advance {
                next: step.next.clone(),
                output: json!({
                    "channel": message.channel.as_str(),
                    "to": message.to,
                    "subject": message.subject,
                    "provider_message_id": receipt.provider_message_id,
                }),
            },
            Err(e) => failure(e),
        }
    }
}

/// The run's contact as loaded for one step, with its merge context.
struct Subject {
    contact: Option<Contact>,
    ctx: MergeContext,
}

struct MessageParts<'a> {
    channel: MessageChannel,
    subject: Option<&'a str>,
    body: &'a str,
    to: Option<&'a str>,
}

/// Bound a collaborator call; an elapsed deadline is a retryable timeout.
async fn with_timeout<T>(
    secs: u64,
    fut: impl Future<Output = Result<T, ActionError>>,
) -> Result<T, ActionError> {
    match tokio::time::timeout(StdDuration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(ActionError::Timeout(secs)),
    }
}

fn delay(step: &StepDefinition, amount: u64, unit: &DelayUnit, now: DateTime<Utc>) -> StepOutcome {
    match unit.duration(amount) {
        Some(wait) => {
            let wake_at = now + wait;
            StepOutcome::Delay {
                next: step.next.clone(),
                wake_at,
                output: json!({ "wake_at": wake_at.to_rfc3339() }),
            }
        }
        None => StepOutcome::Fail {
            error: format!("delay of {amount} {unit:?} is out of range"),
            retryable: false,
        },
    }
}

fn failure(err: ActionError) -> StepOutcome {
    StepOutcome::Fail {
        retryable: err.is_retryable(),
        error: err.to_string(),
    }
}

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["<html", "<body", "<p", "<div", "<br", "<a ", "<table", "</"]
        .iter()
        .any(|tag| lower.contains(tag))
}

// ---------------------------------------------------------------------------
// Condition steps
// ---------------------------------------------------------------------------

/// Evaluate a condition wait.
///
/// The wait started when this log was first entered (`log.started_at`), so
/// re-checks on the same log share one deadline.
#[allow(clippy::too_many_arguments)]
fn wait_until(
    step: &StepDefinition,
    log: &WorkflowStepLog,
    ctx: &MergeContext,
    condition: &str,
    check_every_secs: u64,
    timeout_secs: Option<u64>,
    timeout_next: Option<&str>,
    now: DateTime<Utc>,
) -> StepOutcome {
    let met = match ConditionEvaluator::new().evaluate_bool(condition, ctx.as_value()) {
        Ok(met) => met,
        Err(e) => {
            return StepOutcome::Fail {
                error: format!("condition '{condition}': {e}"),
                retryable: false,
            };
        }
    };

    if met {
        return StepOutcome::Advance {
            next: step.next.clone(),
            output: json!({ "condition_met": true }),
        };
    }

    let deadline = timeout_secs
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(Duration::try_seconds)
        .map(|d| log.started_at + d);

    if let Some(deadline) = deadline {
        if now >= deadline {
            return StepOutcome::Advance {
                next: timeout_next.map(str::to_string).or_else(|| step.next.clone()),
                output: json!({ "condition_met": false, "timed_out": true }),
            };
        }
    }

    let interval = i64::try_from(check_every_secs.max(1))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(1));
    let mut wake_at = now + interval;
    if let Some(deadline) = deadline {
        wake_at = wake_at.min(deadline);
    }

    StepOutcome::Wait {
        wake_at,
        output: json!({ "condition_met": false, "next_check_at": wake_at.to_rfc3339() }),
    }
}

fn branch(ctx: &MergeContext, expression: &str) -> StepOutcome {
    let label = match ConditionEvaluator::new().evaluate_label(expression, ctx.as_value()) {
        Ok(label) => label,
        // Null, arrays and objects carry no natural label; they can only
        // reach the default successor.
        Err(ExpressionError::NoLabel { result }) => result.to_string(),
        Err(e) => {
            return StepOutcome::Fail {
                error: format!("expression '{expression}': {e}"),
                retryable: false,
            };
        }
    };
    StepOutcome::Branch {
        output: json!({ "label": label }),
        label,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
