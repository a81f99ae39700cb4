//! Run lifecycle management.
//!
//! Wraps a `WorkflowRepository` with the engine-level run operations:
//! creation (with trigger de-duplication), the advance/suspend/terminate
//! transitions, the optimistic claim, and cancellation. Every transition is
//! one atomic repository call; a lost race surfaces as
//! [`EngineError::RunAlreadyTerminal`] or
//! [`EngineError::ConcurrentResumeConflict`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use cadence_types::error::RepositoryError;
use cadence_types::workflow::{
    RunIntent, RunStatus, StepLogStatus, WaitKind, WorkflowRun, WorkflowStepLog,
};

use super::clock::Clock;
use super::error::EngineError;
use crate::repository::workflow::{ClaimOutcome, StepClose, WorkflowRepository};

/// Result of a run creation request.
#[derive(Debug, Clone)]
pub enum RunCreation {
    /// A new run positioned at the entry step with a `pending` log.
    Created {
        run: WorkflowRun,
        first_log: WorkflowStepLog,
    },
    /// The trigger occurrence already produced this run.
    Duplicate(WorkflowRun),
}

impl RunCreation {
    pub fn run(&self) -> &WorkflowRun {
        match self {
            RunCreation::Created { run, .. } | RunCreation::Duplicate(run) => run,
        }
    }
}

// ---------------------------------------------------------------------------
// RunManager
// ---------------------------------------------------------------------------

/// Owns the lifecycle of runs and their step logs.
///
/// Generic over `R: WorkflowRepository` so the same transitions run against
/// SQLite or the in-memory store.
pub struct RunManager<R: WorkflowRepository> {
    repo: R,
    clock: Arc<dyn Clock>,
}

impl<R: WorkflowRepository> RunManager<R> {
    pub fn new(repo: R, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Start a run of `workflow_id` for a contact on explicit request.
    ///
    /// No de-duplication: every call creates a new run.
    pub async fn create_run(
        &self,
        workflow_id: Uuid,
        contact_id: Uuid,
        organization_id: Uuid,
    ) -> Result<(WorkflowRun, WorkflowStepLog), EngineError> {
        let intent = RunIntent {
            workflow_id,
            organization_id,
            contact_id,
            trigger_type: "manual".to_string(),
            trigger_key: String::new(),
            trigger_payload: Value::Null,
        };
        match self.create_inner(&intent, None).await? {
            RunCreation::Created { run, first_log } => Ok((run, first_log)),
            // Unreachable without a trigger key; report it rather than panic.
            RunCreation::Duplicate(run) => Err(EngineError::RunAlreadyTerminal(run.id)),
        }
    }

    /// Create the run a trigger evaluation asked for, at most once per
    /// trigger occurrence.
    pub async fn create_run_from_intent(&self, intent: &RunIntent) -> Result<RunCreation, EngineError> {
        self.create_inner(intent, Some(intent.trigger_key.as_str()))
            .await
    }

    async fn create_inner(
        &self,
        intent: &RunIntent,
        trigger_key: Option<&str>,
    ) -> Result<RunCreation, EngineError> {
        let workflow = self
            .repo
            .get_definition(&intent.workflow_id)
            .await?
            .filter(|wf| wf.organization_id == intent.organization_id)
            .ok_or(EngineError::WorkflowNotFound(intent.workflow_id))?;

        if !workflow.active {
            return Err(EngineError::WorkflowInactive(workflow.id));
        }

        if let Some(key) = trigger_key {
            if let Some(existing) = self
                .repo
                .find_run_by_trigger_key(&workflow.id, &intent.contact_id, key)
                .await?
            {
                tracing::debug!(run_id = %existing.id, trigger_key = key, "duplicate trigger ignored");
                return Ok(RunCreation::Duplicate(existing));
            }
        }

        let entry = workflow
            .entry_step()
            .ok_or_else(|| EngineError::MissingStep(workflow.entry_step_id.clone()))?;

        let now = self.clock.now();
        let run_id = Uuid::now_v7();
        let first_log = WorkflowStepLog::pending(run_id, entry, 1, now);
        let run = WorkflowRun {
            id: run_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            organization_id: intent.organization_id,
            contact_id: intent.contact_id,
            status: RunStatus::Running,
            current_step_id: entry.id.clone(),
            trigger_type: intent.trigger_type.clone(),
            trigger_key: trigger_key.map(str::to_string),
            trigger_payload: (!intent.trigger_payload.is_null())
                .then(|| intent.trigger_payload.clone()),
            snapshot: workflow.clone(),
            error: None,
            started_at: now,
            ended_at: None,
        };

        match self.repo.create_run(&run, &first_log).await {
            Ok(()) => {}
            // Lost a race with a concurrent delivery of the same trigger.
            Err(RepositoryError::Conflict(_)) if trigger_key.is_some() => {
                let key = trigger_key.unwrap_or_default();
                let existing = self
                    .repo
                    .find_run_by_trigger_key(&workflow.id, &intent.contact_id, key)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Repository(RepositoryError::Conflict(format!(
                            "trigger '{key}' conflicted but no run exists"
                        )))
                    })?;
                return Ok(RunCreation::Duplicate(existing));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            run_id = %run.id,
            workflow_id = %workflow.id,
            contact_id = %run.contact_id,
            trigger = %run.trigger_type,
            "run created"
        );

        Ok(RunCreation::Created { run, first_log })
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Move a freshly opened `pending` log to `running`.
    pub async fn start(&self, run_id: Uuid, log: &mut WorkflowStepLog) -> Result<(), EngineError> {
        let now = self.clock.now();
        if !self.repo.start_step(&log.id, now).await? {
            return Err(EngineError::RunAlreadyTerminal(run_id));
        }
        log.status = StepLogStatus::Running;
        log.started_at = now;
        log.updated_at = now;
        Ok(())
    }

    /// Claim a waiting log for execution. Returns the claim time.
    pub async fn claim(&self, run_id: Uuid, log_id: Uuid) -> Result<DateTime<Utc>, EngineError> {
        let now = self.clock.now();
        match self.repo.claim_step(&run_id, &log_id, now).await? {
            ClaimOutcome::Claimed => {
                tracing::debug!(run_id = %run_id, log_id = %log_id, "step log claimed");
                Ok(now)
            }
            ClaimOutcome::Lost => Err(EngineError::ConcurrentResumeConflict(log_id)),
            ClaimOutcome::RunNotWaiting => Err(EngineError::RunAlreadyTerminal(run_id)),
        }
    }

    /// Close the current log and open `next`, moving the run's position.
    pub async fn advance(
        &self,
        run: &mut WorkflowRun,
        close: &StepClose,
        next: &WorkflowStepLog,
    ) -> Result<(), EngineError> {
        self.repo
            .advance_step(&run.id, close, next)
            .await
            .map_err(|e| lost_race(e, run.id))?;

        tracing::debug!(
            run_id = %run.id,
            from = %run.current_step_id,
            to = %next.step_id,
            "run advanced"
        );
        run.current_step_id = next.step_id.clone();
        if next.status == StepLogStatus::Waiting {
            run.status = RunStatus::Waiting;
        }
        Ok(())
    }

    /// Park the run on `log_id` until `wake_at`.
    pub async fn suspend(
        &self,
        run: &mut WorkflowRun,
        log_id: Uuid,
        wake_at: DateTime<Utc>,
        kind: WaitKind,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        self.repo
            .suspend_step(&run.id, &log_id, wake_at, kind, error)
            .await
            .map_err(|e| lost_race(e, run.id))?;

        tracing::debug!(
            run_id = %run.id,
            step_id = %run.current_step_id,
            %wake_at,
            kind = kind.as_str(),
            "run suspended"
        );
        run.status = RunStatus::Waiting;
        Ok(())
    }

    /// Move the run to a terminal status, closing its open log if given.
    pub async fn terminate(
        &self,
        run: &mut WorkflowRun,
        close: Option<&StepClose>,
        outcome: RunStatus,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.repo
            .finish_run(&run.id, close, outcome, error, now)
            .await
            .map_err(|e| lost_race(e, run.id))?;

        match outcome {
            RunStatus::Failed => {
                tracing::warn!(run_id = %run.id, step_id = %run.current_step_id, error, "run failed")
            }
            _ => tracing::info!(run_id = %run.id, status = %outcome, "run finished"),
        }
        run.status = outcome;
        run.error = error.map(str::to_string);
        run.ended_at = Some(now);
        Ok(())
    }

    /// Cancel a running or waiting run. Returns `false` if already terminal.
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool, EngineError> {
        let cancelled = match self.repo.cancel_run(&run_id, self.clock.now()).await {
            Ok(cancelled) => cancelled,
            Err(RepositoryError::NotFound) => return Err(EngineError::RunNotFound(run_id)),
            Err(e) => return Err(e.into()),
        };
        if cancelled {
            tracing::info!(run_id = %run_id, "run cancelled");
        }
        Ok(cancelled)
    }

    /// Park an abandoned open log as due at `now`. Returns `false` when the
    /// run or log moved on in the meantime.
    pub async fn requeue(&self, log: &WorkflowStepLog, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let kind = log.wait_kind.unwrap_or(WaitKind::Delay);
        match self
            .repo
            .suspend_step(&log.run_id, &log.id, now, kind, log.error.as_deref())
            .await
        {
            Ok(()) => Ok(true),
            Err(RepositoryError::Conflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the outcome of a step whose run ended while it was in flight.
    pub async fn close_orphan(&self, close: &StepClose) {
        if let Err(e) = self.repo.close_step_log(close).await {
            tracing::debug!(log_id = %close.log_id, error = %e, "in-flight step log already closed");
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        self.repo
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    pub async fn step_logs(&self, run_id: Uuid) -> Result<Vec<WorkflowStepLog>, EngineError> {
        Ok(self.repo.list_step_logs(&run_id).await?)
    }
}

/// A conditional transition that found the run no longer running.
fn lost_race(err: RepositoryError, run_id: Uuid) -> EngineError {
    match err {
        RepositoryError::Conflict(_) => EngineError::RunAlreadyTerminal(run_id),
        other => EngineError::Repository(other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
