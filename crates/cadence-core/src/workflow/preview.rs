//! Step preview for authoring tools.
//!
//! Renders what a step would produce for a synthetic sample context, using
//! the same resolver and evaluator as live runs. No run, no persistence, no
//! collaborator calls.

use serde::Serialize;
use serde_json::Value;

use cadence_types::workflow::{MessageChannel, StepConfig, StepType};

use super::expression::ConditionEvaluator;
use super::merge::{missing_fields, resolve, resolve_json, resolve_with, EscapeMode, MergeContext};

/// Rendered view of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewOutput {
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Resolved value of a field mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Resolved payload of an external action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Value a condition or branch expression evaluates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<i64>,
    /// Placeholders the sample context could not fill.
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreviewOutput {
    fn empty(step_type: StepType) -> Self {
        Self {
            step_type,
            to: None,
            subject: None,
            body: None,
            value: None,
            payload: None,
            condition_result: None,
            delay_secs: None,
            missing_fields: Vec::new(),
            error: None,
        }
    }
}

/// Render `config` against `sample` (a JSON object shaped like a run's merge
/// context: `contact`, `organization`, `pipeline`, `stage`, ...).
pub fn preview_step(config: &StepConfig, sample: &Value) -> PreviewOutput {
    let ctx = MergeContext::from_value(sample.clone());
    let mut out = PreviewOutput::empty(config.step_type());

    match config {
        StepConfig::SendMessage {
            channel,
            subject,
            body,
            to,
        } => {
            out.to = match to {
                Some(to) => Some(resolve_with(to, &ctx, EscapeMode::SingleLine)),
                None => {
                    let path = match channel {
                        MessageChannel::Email => "contact.email",
                        MessageChannel::Sms => "contact.phone",
                    };
                    ctx.lookup(path).and_then(Value::as_str).map(str::to_string)
                }
            };
            out.subject = subject
                .as_deref()
                .map(|s| resolve_with(s, &ctx, EscapeMode::SingleLine));
            out.body = Some(resolve(body, &ctx));
            for template in subject.iter().chain(std::iter::once(body)).chain(to.iter()) {
                merge_missing(&mut out.missing_fields, missing_fields(template, &ctx));
            }
        }
        StepConfig::WaitDelay { amount, unit } => match unit.duration(*amount) {
            Some(d) => out.delay_secs = Some(d.num_seconds()),
            None => out.error = Some("delay is out of range".to_string()),
        },
        StepConfig::WaitUntilCondition { condition, .. } => {
            evaluate_into(&mut out, condition, &ctx);
        }
        StepConfig::BranchOnCondition { expression } => {
            evaluate_into(&mut out, expression, &ctx);
        }
        StepConfig::MutateContactField { value, .. } => {
            out.value = Some(resolve(value, &ctx));
            out.missing_fields = missing_fields(value, &ctx);
        }
        StepConfig::InvokeExternalAction { payload, .. } => {
            out.payload = Some(resolve_json(payload, &ctx));
            collect_json_missing(payload, &ctx, &mut out.missing_fields);
        }
        StepConfig::End => {}
    }

    out
}

fn evaluate_into(out: &mut PreviewOutput, expression: &str, ctx: &MergeContext) {
    match ConditionEvaluator::new().evaluate_value(expression, ctx.as_value()) {
        Ok(value) => out.condition_result = Some(value),
        Err(e) => out.error = Some(e.to_string()),
    }
}

fn merge_missing(into: &mut Vec<String>, found: Vec<String>) {
    for path in found {
        if !into.contains(&path) {
            into.push(path);
        }
    }
}

fn collect_json_missing(value: &Value, ctx: &MergeContext, into: &mut Vec<String>) {
    match value {
        Value::String(s) => merge_missing(into, missing_fields(s, ctx)),
        Value::Array(items) => items.iter().for_each(|v| collect_json_missing(v, ctx, into)),
        Value::Object(map) => map.values().for_each(|v| collect_json_missing(v, ctx, into)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Value {
        json!({
            "contact": {
                "first_name": "Ada",
                "email": "ada@example.com",
                "custom_fields": { "plan": "pro" }
            },
            "organization": { "name": "Analytical Engines" }
        })
    }

    #[test]
    fn test_preview_message() {
        let config = StepConfig::SendMessage {
            channel: MessageChannel::Email,
            subject: Some("Hello {{ contact.first_name }}".into()),
            body: "From {{ org.name }}, {{ contact.title }}".into(),
            to: None,
        };
        let out = preview_step(&config, &sample());
        assert_eq!(out.to.as_deref(), Some("ada@example.com"));
        assert_eq!(out.subject.as_deref(), Some("Hello Ada"));
        assert_eq!(out.body.as_deref(), Some("From Analytical Engines, "));
        assert_eq!(out.missing_fields, vec!["contact.title"]);
    }

    #[test]
    fn test_preview_matches_live_resolution() {
        let template = "Hi {{ contact.first_name | \"there\" }}";
        let config = StepConfig::MutateContactField {
            field: "greeting".into(),
            value: template.into(),
        };
        let out = preview_step(&config, &sample());
        let ctx = MergeContext::from_value(sample());
        assert_eq!(out.value, Some(resolve(template, &ctx)));
    }

    #[test]
    fn test_preview_branch_and_action() {
        let branch = StepConfig::BranchOnCondition {
            expression: "contact.custom_fields.plan == 'pro'".into(),
        };
        assert_eq!(
            preview_step(&branch, &sample()).condition_result,
            Some(json!(true))
        );

        let action = StepConfig::InvokeExternalAction {
            action: "create_task".into(),
            payload: json!({ "title": "Call {{ contact.first_name }} at {{ contact.phone }}" }),
        };
        let out = preview_step(&action, &sample());
        assert_eq!(out.payload, Some(json!({ "title": "Call Ada at " })));
        assert_eq!(out.missing_fields, vec!["contact.phone"]);
    }

    #[test]
    fn test_preview_reports_bad_expression() {
        let branch = StepConfig::BranchOnCondition {
            expression: "contact.plan ==".into(),
        };
        let out = preview_step(&branch, &sample());
        assert!(out.condition_result.is_none());
        assert!(out.error.is_some());
    }
}
