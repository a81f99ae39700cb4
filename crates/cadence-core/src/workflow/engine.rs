//! `WorkflowEngine`: the facade the CLI, the REST server and embedders use.
//!
//! Wires the definition store, trigger evaluator, run manager, executor and
//! resume sweep together over one repository and one collaborator set.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use cadence_types::config::EngineConfig;
use cadence_types::workflow::{
    RunStatus, StepConfig, StepLogStatus, TriggerEvent, TriggerEventKind, WaitKind,
    WorkflowDefinition, WorkflowRun, WorkflowStepLog,
};

use super::action::Collaborators;
use super::clock::{Clock, SystemClock};
use super::definition::validate_definition;
use super::error::EngineError;
use super::executor::{PassReport, StepExecutor};
use super::preview::{preview_step, PreviewOutput};
use super::resumer::{process_due_steps, recover_stalled_steps, SweepReport};
use super::run_manager::{RunCreation, RunManager};
use super::step_runner::StepRunner;
use super::trigger::TriggerEvaluator;
use crate::repository::workflow::WorkflowRepository;

/// What an inbound event did to one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggeredRun {
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    /// The occurrence had already started this run; nothing new happened.
    pub duplicate: bool,
    pub status: RunStatus,
}

/// A run with its step logs in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDetails {
    pub run: WorkflowRun,
    pub logs: Vec<WorkflowStepLog>,
}

/// Automation workflow engine.
pub struct WorkflowEngine<R: WorkflowRepository> {
    executor: StepExecutor<R>,
    config: EngineConfig,
    triggers: TriggerEvaluator,
}

impl<R: WorkflowRepository> WorkflowEngine<R> {
    pub fn new(
        repo: R,
        collaborators: Collaborators,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let runner = StepRunner::new(
            collaborators,
            config.action_timeout_secs,
            config.condition_check_interval_secs,
        );
        let executor = StepExecutor::new(RunManager::new(repo, clock), runner, &config);
        Self {
            executor,
            config,
            triggers: TriggerEvaluator::new(),
        }
    }

    /// Engine on wall-clock time.
    pub fn with_system_clock(repo: R, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self::new(repo, collaborators, config, Arc::new(SystemClock))
    }

    pub fn repo(&self) -> &R {
        self.executor.runs().repo()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &StepExecutor<R> {
        &self.executor
    }

    pub fn collaborators(&self) -> &Collaborators {
        self.executor.runner().collaborators()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Validate and store a definition. Cycles and dangling references are
    /// rejected here, before any run can reach them.
    pub async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), EngineError> {
        validate_definition(def).map_err(|e| EngineError::InvalidWorkflow(e.to_string()))?;
        self.repo().save_definition(def).await?;
        tracing::info!(workflow_id = %def.id, name = %def.name, "workflow saved");
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.repo()
            .get_definition(&workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    pub async fn list_workflows(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.repo().list_definitions(organization_id).await?)
    }

    pub async fn delete_workflow(&self, workflow_id: Uuid) -> Result<bool, EngineError> {
        Ok(self.repo().delete_definition(&workflow_id).await?)
    }

    // -----------------------------------------------------------------------
    // Starting runs
    // -----------------------------------------------------------------------

    /// Evaluate an event against the organization's workflows and start a
    /// run for every match, at most once per trigger occurrence.
    pub async fn handle_event(&self, event: &TriggerEvent) -> Result<Vec<TriggeredRun>, EngineError> {
        let candidates = match &event.kind {
            TriggerEventKind::Manual { workflow_id }
            | TriggerEventKind::ScheduleTick { workflow_id } => self
                .repo()
                .get_definition(workflow_id)
                .await?
                .into_iter()
                .collect(),
            _ => {
                self.repo()
                    .list_definitions(Some(&event.organization_id))
                    .await?
            }
        };

        let intents = self.triggers.evaluate_all(event, &candidates);
        let mut triggered = Vec::with_capacity(intents.len());

        for intent in intents {
            let creation = match self.executor.runs().create_run_from_intent(&intent).await {
                Ok(creation) => creation,
                // Deactivated or deleted between listing and creation.
                Err(e @ (EngineError::WorkflowInactive(_) | EngineError::WorkflowNotFound(_))) => {
                    tracing::info!(workflow_id = %intent.workflow_id, reason = %e, "trigger dropped");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match creation {
                RunCreation::Created { run, first_log } => {
                    let (workflow_id, run_id) = (run.workflow_id, run.id);
                    let status = match self.executor.start(run, first_log).await {
                        Ok(pass) => pass.status,
                        Err(e) if e.is_skip() => RunStatus::Cancelled,
                        Err(e) => return Err(e),
                    };
                    triggered.push(TriggeredRun {
                        workflow_id,
                        run_id,
                        duplicate: false,
                        status,
                    });
                }
                RunCreation::Duplicate(run) => triggered.push(TriggeredRun {
                    workflow_id: run.workflow_id,
                    run_id: run.id,
                    duplicate: true,
                    status: run.status,
                }),
            }
        }

        Ok(triggered)
    }

    /// Start a run on explicit request and drive it until it first suspends.
    pub async fn start_run(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        organization_id: Uuid,
    ) -> Result<PassReport, EngineError> {
        let (run, first_log) = self
            .executor
            .runs()
            .create_run(workflow_id, contact_id, organization_id)
            .await?;
        self.executor.start(run, first_log).await
    }

    /// Emit a schedule tick of `workflow_id` for each contact.
    pub async fn fire_schedule(
        &self,
        workflow_id: Uuid,
        contact_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<TriggeredRun>, EngineError> {
        let workflow = self.get_workflow(workflow_id).await?;
        let mut triggered = Vec::new();
        for contact_id in contact_ids {
            let event = TriggerEvent {
                organization_id: workflow.organization_id,
                contact_id: *contact_id,
                occurred_at: at,
                kind: TriggerEventKind::ScheduleTick { workflow_id },
                payload: Value::Null,
            };
            triggered.extend(self.handle_event(&event).await?);
        }
        Ok(triggered)
    }

    // -----------------------------------------------------------------------
    // Resumption
    // -----------------------------------------------------------------------

    /// Requeue abandoned steps, then resume up to `limit` due step logs.
    ///
    /// Safe to call repeatedly and from several processes at once.
    pub async fn process_due_steps(&self, limit: Option<u32>) -> Result<SweepReport, EngineError> {
        let limit = limit.unwrap_or(self.config.sweep_batch_limit);
        let stall = i64::try_from(self.config.stall_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(600));

        let recovered = recover_stalled_steps(&self.executor, stall, limit).await?;
        let mut report =
            process_due_steps(&self.executor, limit, self.config.sweep_concurrency).await?;
        report.recovered = recovered;
        Ok(report)
    }

    /// Re-check a run waiting on a condition right away instead of at its
    /// next scheduled check. Returns `None` when the run is not waiting on a
    /// condition or another worker got to it first.
    pub async fn signal_run(&self, run_id: Uuid) -> Result<Option<PassReport>, EngineError> {
        let run = self.executor.runs().get_run(run_id).await?;
        if run.status != RunStatus::Waiting {
            return Ok(None);
        }

        let logs = self.executor.runs().step_logs(run_id).await?;
        let Some(log) = logs.into_iter().find(|l| {
            l.status == StepLogStatus::Waiting && l.wait_kind == Some(WaitKind::Condition)
        }) else {
            return Ok(None);
        };

        match self.executor.resume(log).await {
            Ok(pass) => Ok(Some(pass)),
            Err(e) if e.is_skip() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Run control and inspection
    // -----------------------------------------------------------------------

    /// Cancel a running or waiting run. Returns `false` if already terminal.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<bool, EngineError> {
        self.executor.runs().cancel(run_id).await
    }

    pub async fn run_details(&self, run_id: Uuid) -> Result<RunDetails, EngineError> {
        let run = self.executor.runs().get_run(run_id).await?;
        let logs = self.executor.runs().step_logs(run_id).await?;
        Ok(RunDetails { run, logs })
    }

    pub async fn list_runs(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        Ok(self.repo().list_runs(workflow_id, limit).await?)
    }

    /// Render a step against sample data. Pure; see [`preview_step`].
    pub fn preview_step(&self, config: &StepConfig, sample: &Value) -> PreviewOutput {
        preview_step(config, sample)
    }
}
