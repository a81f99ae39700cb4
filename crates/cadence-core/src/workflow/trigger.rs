//! Trigger evaluation: decide whether an event starts a run.
//!
//! `TriggerEvaluator::evaluate` matches one event against one workflow's
//! trigger configuration and, when a trigger matches and its optional `when`
//! guard passes, returns a `RunIntent` carrying the natural de-duplication
//! key of the occurrence. It is pure: duplicate delivery of the same event
//! yields the same key, and the run manager refuses a second run for it.

use serde_json::{json, Value};

use cadence_types::workflow::{
    trigger_key, RunIntent, TriggerConfig, TriggerEvent, TriggerEventKind, WorkflowDefinition,
};

use super::expression::ConditionEvaluator;

/// Matches events against workflow trigger configurations.
///
/// Stateless; guards are compiled per evaluation, so the evaluator can be
/// shared freely across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `event` should start a run of `workflow`.
    pub fn evaluate(&self, event: &TriggerEvent, workflow: &WorkflowDefinition) -> Option<RunIntent> {
        if !workflow.active || workflow.organization_id != event.organization_id {
            return None;
        }

        let matched = match &event.kind {
            // An explicit request names its workflow; a configured manual
            // trigger only contributes its guard.
            TriggerEventKind::Manual { workflow_id } => {
                *workflow_id == workflow.id && {
                    let guards: Vec<&TriggerConfig> = workflow
                        .triggers
                        .iter()
                        .filter(|t| matches!(t, TriggerConfig::Manual { .. }))
                        .collect();
                    guards.is_empty() || guards.iter().any(|t| self.guard_passes(t, event, workflow))
                }
            }
            _ => workflow
                .triggers
                .iter()
                .filter(|t| Self::config_matches(t, &event.kind, workflow))
                .any(|t| self.guard_passes(t, event, workflow)),
        };

        if !matched {
            return None;
        }

        tracing::debug!(
            workflow_id = %workflow.id,
            contact_id = %event.contact_id,
            kind = event.kind.as_str(),
            "trigger matched"
        );

        Some(RunIntent {
            workflow_id: workflow.id,
            organization_id: event.organization_id,
            contact_id: event.contact_id,
            trigger_type: event.kind.as_str().to_string(),
            trigger_key: trigger_key(workflow.id, event.contact_id, event.occurred_at),
            trigger_payload: event.payload.clone(),
        })
    }

    /// Evaluate one event against many workflows.
    pub fn evaluate_all<'a>(
        &self,
        event: &TriggerEvent,
        workflows: impl IntoIterator<Item = &'a WorkflowDefinition>,
    ) -> Vec<RunIntent> {
        workflows
            .into_iter()
            .filter_map(|wf| self.evaluate(event, wf))
            .collect()
    }

    fn config_matches(config: &TriggerConfig, kind: &TriggerEventKind, workflow: &WorkflowDefinition) -> bool {
        match (config, kind) {
            (
                TriggerConfig::StageEntered {
                    pipeline_id,
                    stage_id,
                    ..
                },
                TriggerEventKind::StageEntered {
                    pipeline_id: event_pipeline,
                    stage_id: event_stage,
                },
            ) => {
                stage_id == event_stage
                    && pipeline_id
                        .as_ref()
                        .is_none_or(|p| event_pipeline.as_ref() == Some(p))
            }
            (
                TriggerConfig::FormSubmitted { form_id, .. },
                TriggerEventKind::FormSubmitted { form_id: event_form },
            ) => form_id == event_form,
            (TriggerConfig::TagAdded { tag, .. }, TriggerEventKind::TagAdded { tag: event_tag }) => {
                tag.eq_ignore_ascii_case(event_tag)
            }
            (TriggerConfig::Schedule { .. }, TriggerEventKind::ScheduleTick { workflow_id }) => {
                *workflow_id == workflow.id
            }
            _ => false,
        }
    }

    fn guard_passes(&self, config: &TriggerConfig, event: &TriggerEvent, workflow: &WorkflowDefinition) -> bool {
        let Some(when) = config.when_clause() else {
            return true;
        };
        match ConditionEvaluator::new().evaluate_bool(when, &eval_context(event)) {
            Ok(passed) => passed,
            Err(e) => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    when,
                    error = %e,
                    "trigger guard failed to evaluate; treating as no match"
                );
                false
            }
        }
    }
}

/// JSON object a `when` guard evaluates against.
///
/// Shape: `{ "event": <kind>, "payload": <payload>, "contact_id": "...", "occurred_at": "..." }`
fn eval_context(event: &TriggerEvent) -> Value {
    json!({
        "event": serde_json::to_value(&event.kind).unwrap_or(Value::Null),
        "payload": event.payload,
        "contact_id": event.contact_id.to_string(),
        "occurred_at": event.occurred_at.to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::workflow::tests_support::linear_workflow;

    fn workflow_with(triggers: Vec<TriggerConfig>) -> WorkflowDefinition {
        let mut wf = linear_workflow(Uuid::now_v7());
        wf.triggers = triggers;
        wf
    }

    fn event(wf: &WorkflowDefinition, kind: TriggerEventKind, payload: Value) -> TriggerEvent {
        TriggerEvent {
            organization_id: wf.organization_id,
            contact_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            kind,
            payload,
        }
    }

    fn stage(stage_id: &str) -> TriggerEventKind {
        TriggerEventKind::StageEntered {
            pipeline_id: Some("sales".to_string()),
            stage_id: stage_id.to_string(),
        }
    }

    #[test]
    fn test_stage_trigger_matches() {
        let wf = workflow_with(vec![TriggerConfig::StageEntered {
            pipeline_id: None,
            stage_id: "qualified".to_string(),
            when: None,
        }]);
        let ev = event(&wf, stage("qualified"), json!({}));
        let intent = TriggerEvaluator::new().evaluate(&ev, &wf).unwrap();
        assert_eq!(intent.workflow_id, wf.id);
        assert_eq!(intent.contact_id, ev.contact_id);
        assert_eq!(intent.trigger_type, "stage_entered");
        assert_eq!(
            intent.trigger_key,
            trigger_key(wf.id, ev.contact_id, ev.occurred_at)
        );

        let other = event(&wf, stage("lost"), json!({}));
        assert!(TriggerEvaluator::new().evaluate(&other, &wf).is_none());
    }

    #[test]
    fn test_stage_trigger_pipeline_filter() {
        let wf = workflow_with(vec![TriggerConfig::StageEntered {
            pipeline_id: Some("support".to_string()),
            stage_id: "qualified".to_string(),
            when: None,
        }]);
        let ev = event(&wf, stage("qualified"), json!({}));
        assert!(TriggerEvaluator::new().evaluate(&ev, &wf).is_none());
    }

    #[test]
    fn test_when_guard_filters_payload() {
        let wf = workflow_with(vec![TriggerConfig::FormSubmitted {
            form_id: "demo".to_string(),
            when: Some("payload.source == 'landing'".to_string()),
        }]);
        let kind = TriggerEventKind::FormSubmitted {
            form_id: "demo".to_string(),
        };
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator
            .evaluate(&event(&wf, kind.clone(), json!({ "source": "landing" })), &wf)
            .is_some());
        assert!(evaluator
            .evaluate(&event(&wf, kind, json!({ "source": "ads" })), &wf)
            .is_none());
    }

    #[test]
    fn test_broken_guard_is_no_match() {
        let wf = workflow_with(vec![TriggerConfig::TagAdded {
            tag: "vip".to_string(),
            when: Some("payload.count >".to_string()),
        }]);
        let ev = event(
            &wf,
            TriggerEventKind::TagAdded {
                tag: "VIP".to_string(),
            },
            json!({}),
        );
        assert!(TriggerEvaluator::new().evaluate(&ev, &wf).is_none());
    }

    #[test]
    fn test_inactive_or_foreign_workflow_never_matches() {
        let mut wf = workflow_with(vec![TriggerConfig::TagAdded {
            tag: "vip".to_string(),
            when: None,
        }]);
        let kind = TriggerEventKind::TagAdded {
            tag: "vip".to_string(),
        };
        let mut ev = event(&wf, kind, json!({}));
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator.evaluate(&ev, &wf).is_some());

        ev.organization_id = Uuid::now_v7();
        assert!(evaluator.evaluate(&ev, &wf).is_none());

        ev.organization_id = wf.organization_id;
        wf.active = false;
        assert!(evaluator.evaluate(&ev, &wf).is_none());
    }

    #[test]
    fn test_manual_request_targets_one_workflow() {
        let wf = workflow_with(vec![]);
        let evaluator = TriggerEvaluator::new();
        let ev = event(&wf, TriggerEventKind::Manual { workflow_id: wf.id }, json!({}));
        assert_eq!(evaluator.evaluate(&ev, &wf).unwrap().trigger_type, "manual");

        let elsewhere = event(
            &wf,
            TriggerEventKind::Manual {
                workflow_id: Uuid::now_v7(),
            },
            json!({}),
        );
        assert!(evaluator.evaluate(&elsewhere, &wf).is_none());
    }

    #[test]
    fn test_schedule_tick_requires_schedule_trigger() {
        let scheduled = workflow_with(vec![TriggerConfig::Schedule {
            schedule: "daily".to_string(),
            when: None,
        }]);
        let unscheduled = workflow_with(vec![]);
        let evaluator = TriggerEvaluator::new();

        let tick = event(
            &scheduled,
            TriggerEventKind::ScheduleTick {
                workflow_id: scheduled.id,
            },
            json!({}),
        );
        assert!(evaluator.evaluate(&tick, &scheduled).is_some());

        let mut tick = tick;
        tick.organization_id = unscheduled.organization_id;
        tick.kind = TriggerEventKind::ScheduleTick {
            workflow_id: unscheduled.id,
        };
        assert!(evaluator.evaluate(&tick, &unscheduled).is_none());
    }

    #[test]
    fn test_duplicate_delivery_yields_same_key() {
        let wf = workflow_with(vec![TriggerConfig::TagAdded {
            tag: "vip".to_string(),
            when: None,
        }]);
        let ev = event(
            &wf,
            TriggerEventKind::TagAdded {
                tag: "vip".to_string(),
            },
            json!({}),
        );
        let evaluator = TriggerEvaluator::new();
        let first = evaluator.evaluate(&ev, &wf).unwrap();
        let second = evaluator.evaluate(&ev.clone(), &wf).unwrap();
        assert_eq!(first.trigger_key, second.trigger_key);

        let mut later = ev;
        later.occurred_at += Duration::seconds(1);
        assert_ne!(evaluator.evaluate(&later, &wf).unwrap().trigger_key, first.trigger_key);
    }

    #[test]
    fn test_evaluate_all_filters_workflows() {
        let a = workflow_with(vec![TriggerConfig::TagAdded {
            tag: "vip".to_string(),
            when: None,
        }]);
        let mut b = workflow_with(vec![TriggerConfig::TagAdded {
            tag: "other".to_string(),
            when: None,
        }]);
        b.organization_id = a.organization_id;
        let ev = event(
            &a,
            TriggerEventKind::TagAdded {
                tag: "vip".to_string(),
            },
            json!({}),
        );
        let intents = TriggerEvaluator::new().evaluate_all(&ev, [&a, &b]);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].workflow_id, a.id);
    }
}
