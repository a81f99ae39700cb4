//! Step executor: drives one run forward until it suspends or ends.
//!
//! # Execution flow
//!
//! 1. The caller hands over a run and a step log it owns (`running`): a
//!    freshly started entry log, or a waiting log it just claimed.
//! 2. The executor runs the step through [`StepRunner`] and turns the
//!    [`StepOutcome`] into exactly one atomic run transition.
//! 3. Immediate continuations loop in the same pass, up to
//!    `max_steps_per_pass`; the pass then yields with a zero-delay suspension.
//! 4. Delays, condition waits and retries persist a wake time and return.
//!
//! Only the run's snapshot is navigated, never the live definition.
//! Cancellation is observed at each transition: a transition that finds the
//! run no longer running records the in-flight step's outcome on its log and
//! stops with [`EngineError::RunAlreadyTerminal`].

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use cadence_types::config::{EngineConfig, RetrySettings};
use cadence_types::workflow::{
    RunStatus, StepDefinition, StepLogStatus, WaitKind, WorkflowRun, WorkflowStepLog,
};

use super::error::EngineError;
use super::retry::{RetryDecision, RetryHandler};
use super::run_manager::RunManager;
use super::step_runner::{StepOutcome, StepRunner};
use crate::repository::workflow::{StepClose, WorkflowRepository};

// ---------------------------------------------------------------------------
// PassReport
// ---------------------------------------------------------------------------

/// Where a run stands after one executor pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub current_step_id: String,
    pub steps_executed: u32,
}

impl PassReport {
    fn of(run: &WorkflowRun, steps_executed: u32) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            current_step_id: run.current_step_id.clone(),
            steps_executed,
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Drives runs through their step graph.
///
/// Generic over `R: WorkflowRepository` for storage flexibility.
pub struct StepExecutor<R: WorkflowRepository> {
    runs: RunManager<R>,
    runner: StepRunner,
    retry: RetrySettings,
    max_steps_per_pass: u32,
}

impl<R: WorkflowRepository> StepExecutor<R> {
    pub fn new(runs: RunManager<R>, runner: StepRunner, config: &EngineConfig) -> Self {
        Self {
            runs,
            runner,
            retry: config.retry.clone(),
            max_steps_per_pass: config.max_steps_per_pass.max(1),
        }
    }

    pub fn runs(&self) -> &RunManager<R> {
        &self.runs
    }

    pub fn runner(&self) -> &StepRunner {
        &self.runner
    }

    /// Execute a newly created run from its `pending` entry log.
    pub async fn start(
        &self,
        run: WorkflowRun,
        mut first_log: WorkflowStepLog,
    ) -> Result<PassReport, EngineError> {
        self.runs.start(run.id, &mut first_log).await?;
        self.drive(run, first_log).await
    }

    /// Resume a run from one of its waiting step logs.
    ///
    /// Claims the log first; a lost claim is
    /// [`EngineError::ConcurrentResumeConflict`], a run that is no longer
    /// waiting is [`EngineError::RunAlreadyTerminal`]. The log, not the run's
    /// position, decides which step and attempt execute.
    pub async fn resume(&self, mut log: WorkflowStepLog) -> Result<PassReport, EngineError> {
        let mut run = self.runs.get_run(log.run_id).await?;
        if run.status.is_terminal() {
            return Err(EngineError::RunAlreadyTerminal(run.id));
        }

        let claimed_at = self.runs.claim(run.id, log.id).await?;
        let woke_for = log.next_retry_at.take();
        run.status = RunStatus::Running;
        log.status = StepLogStatus::Running;
        log.updated_at = claimed_at;
        if log.wait_kind == Some(WaitKind::Delay) {
            log.started_at = claimed_at;
        }

        tracing::debug!(
            run_id = %run.id,
            step_id = %log.step_id,
            attempt = log.attempt,
            kind = log.wait_kind.map(|k| k.as_str()),
            "resuming run"
        );

        match log.wait_kind {
            Some(WaitKind::Retry) => {
                log = match self.open_retry_attempt(&mut run, &log).await? {
                    Some(next) => next,
                    None => return Ok(PassReport::of(&run, 0)),
                };
            }
            Some(WaitKind::Finish) => {
                let closing = StepClose {
                    log_id: log.id,
                    status: StepLogStatus::Completed,
                    output: Some(json!({ "wake_at": woke_for.map(|t| t.to_rfc3339()) })),
                    error: None,
                    at: claimed_at,
                };
                self.complete(&mut run, closing).await?;
                return Ok(PassReport::of(&run, 0));
            }
            _ => {}
        }

        self.drive(run, log).await
    }

    /// Close a failed attempt and open the next one for the same step.
    async fn open_retry_attempt(
        &self,
        run: &mut WorkflowRun,
        log: &WorkflowStepLog,
    ) -> Result<Option<WorkflowStepLog>, EngineError> {
        let Some(step) = run.snapshot.step(&log.step_id).cloned() else {
            self.fail_run(run, log, &EngineError::MissingStep(log.step_id.clone()))
                .await?;
            return Ok(None);
        };

        let now = self.runs.now();
        let close = StepClose {
            log_id: log.id,
            status: StepLogStatus::Failed,
            output: Some(json!({ "error_code": "step_action_failed", "retried": true })),
            error: log.error.clone(),
            at: now,
        };
        let mut next = WorkflowStepLog::pending(run.id, &step, log.attempt + 1, now);
        self.guarded(self.runs.advance(run, &close, &next).await, &close)
            .await?;
        self.runs.start(run.id, &mut next).await?;

        tracing::info!(
            run_id = %run.id,
            step_id = %step.id,
            attempt = next.attempt,
            "retrying step"
        );
        Ok(Some(next))
    }

    /// The synchronous step loop.
    async fn drive(
        &self,
        mut run: WorkflowRun,
        mut log: WorkflowStepLog,
    ) -> Result<PassReport, EngineError> {
        let mut executed = 0u32;

        loop {
            if executed >= self.max_steps_per_pass {
                let guard = EngineError::MaxStepsExceeded(self.max_steps_per_pass);
                tracing::info!(
                    run_id = %run.id,
                    step_id = %log.step_id,
                    reason = %guard,
                    "yielding run to the sweep"
                );
                let now = self.runs.now();
                self.runs
                    .suspend(&mut run, log.id, now, WaitKind::Yield, None)
                    .await?;
                return Ok(PassReport::of(&run, executed));
            }

            let Some(step) = run.snapshot.step(&log.step_id).cloned() else {
                self.fail_run(&mut run, &log, &EngineError::MissingStep(log.step_id.clone()))
                    .await?;
                return Ok(PassReport::of(&run, executed));
            };

            executed += 1;
            let now = self.runs.now();
            let outcome = self.runner.run(&run, &step, &log, now).await;

            match self.settle(&mut run, &log, &step, outcome).await? {
                Some(next) => log = next,
                None => return Ok(PassReport::of(&run, executed)),
            }
        }
    }

    /// Apply a step outcome. Returns the next log to execute in this pass.
    async fn settle(
        &self,
        run: &mut WorkflowRun,
        log: &WorkflowStepLog,
        step: &StepDefinition,
        outcome: StepOutcome,
    ) -> Result<Option<WorkflowStepLog>, EngineError> {
        let now = self.runs.now();
        let close = |status: StepLogStatus, output: Value, error: Option<String>| StepClose {
            log_id: log.id,
            status,
            output: Some(output),
            error,
            at: now,
        };

        match outcome {
            StepOutcome::Advance { next, output } => {
                self.follow(run, close(StepLogStatus::Completed, output, None), next.as_deref())
                    .await
            }
            StepOutcome::Skip { next, reason } => {
                tracing::debug!(run_id = %run.id, step_id = %step.id, %reason, "step skipped");
                let closing = close(StepLogStatus::Skipped, json!({ "skipped": reason }), None);
                self.follow(run, closing, next.as_deref()).await
            }
            StepOutcome::Branch { label, output } => {
                let target = step
                    .branches
                    .get(&label)
                    .or(step.default_next.as_ref())
                    .cloned();
                match target {
                    Some(target) => {
                        self.follow(run, close(StepLogStatus::Completed, output, None), Some(&target))
                            .await
                    }
                    None => {
                        let err = EngineError::NoMatchingBranch {
                            step_id: step.id.clone(),
                            label,
                        };
                        self.fail_run(run, log, &err).await?;
                        Ok(None)
                    }
                }
            }
            StepOutcome::Delay {
                next,
                wake_at,
                output,
            } => {
                // Nothing follows the delay: park on this log and finish the
                // run when it wakes.
                let Some(next_id) = next else {
                    let result = self
                        .runs
                        .suspend(run, log.id, wake_at, WaitKind::Finish, None)
                        .await;
                    let cancelled = close(StepLogStatus::Skipped, output, Some("run ended".into()));
                    self.guarded(result, &cancelled).await?;
                    return Ok(None);
                };
                let closing = close(StepLogStatus::Completed, output, None);
                let Some(next_step) = run.snapshot.step(&next_id).cloned() else {
                    self.fail_run(run, log, &EngineError::MissingStep(next_id)).await?;
                    return Ok(None);
                };
                let mut next_log = WorkflowStepLog::pending(run.id, &next_step, 1, now);
                next_log.status = StepLogStatus::Waiting;
                next_log.wait_kind = Some(WaitKind::Delay);
                next_log.next_retry_at = Some(wake_at);
                self.guarded(self.runs.advance(run, &closing, &next_log).await, &closing)
                    .await?;
                Ok(None)
            }
            StepOutcome::Wait { wake_at, output } => {
                let result = self
                    .runs
                    .suspend(run, log.id, wake_at, WaitKind::Condition, None)
                    .await;
                let cancelled = close(StepLogStatus::Skipped, output, Some("run ended".into()));
                self.guarded(result, &cancelled).await?;
                Ok(None)
            }
            StepOutcome::Fail { error, retryable } => {
                let policy = RetryHandler::policy_for(step, &self.retry);
                match RetryHandler::decide(policy, log.attempt, retryable) {
                    RetryDecision::RetryAfter {
                        delay,
                        next_attempt,
                    } => {
                        let wake_at = now + delay;
                        tracing::info!(
                            run_id = %run.id,
                            step_id = %step.id,
                            attempt = log.attempt,
                            next_attempt,
                            %wake_at,
                            %error,
                            "step failed, retry scheduled"
                        );
                        let result = self
                            .runs
                            .suspend(run, log.id, wake_at, WaitKind::Retry, Some(&error))
                            .await;
                        let failed = close(
                            StepLogStatus::Failed,
                            json!({ "error_code": "step_action_failed" }),
                            Some(error),
                        );
                        self.guarded(result, &failed).await?;
                        Ok(None)
                    }
                    RetryDecision::GiveUp => {
                        let err = EngineError::StepActionFailed {
                            step_id: step.id.clone(),
                            message: error,
                            retryable,
                        };
                        self.fail_run(run, log, &err).await?;
                        Ok(None)
                    }
                }
            }
            StepOutcome::End { output } => {
                self.complete(run, close(StepLogStatus::Completed, output, None))
                    .await
            }
        }
    }

    /// Close the current log and move to `next`, or finish when there is none.
    async fn follow(
        &self,
        run: &mut WorkflowRun,
        closing: StepClose,
        next: Option<&str>,
    ) -> Result<Option<WorkflowStepLog>, EngineError> {
        let Some(next_id) = next else {
            return self.complete(run, closing).await;
        };

        let Some(next_step) = run.snapshot.step(next_id).cloned() else {
            let err = EngineError::MissingStep(next_id.to_string());
            let failed = StepClose {
                status: StepLogStatus::Failed,
                output: Some(json!({ "error_code": err.code() })),
                error: Some(err.to_string()),
                ..closing
            };
            let msg = err.to_string();
            let result = self
                .runs
                .terminate(run, Some(&failed), RunStatus::Failed, Some(&msg))
                .await;
            self.guarded(result, &failed).await?;
            return Ok(None);
        };

        let mut next_log = WorkflowStepLog::pending(run.id, &next_step, 1, self.runs.now());
        self.guarded(self.runs.advance(run, &closing, &next_log).await, &closing)
            .await?;
        self.runs.start(run.id, &mut next_log).await?;
        Ok(Some(next_log))
    }

    async fn complete(
        &self,
        run: &mut WorkflowRun,
        closing: StepClose,
    ) -> Result<Option<WorkflowStepLog>, EngineError> {
        let result = self
            .runs
            .terminate(run, Some(&closing), RunStatus::Completed, None)
            .await;
        self.guarded(result, &closing).await?;
        Ok(None)
    }

    /// Fail the run at `log`, recording the error code on the log.
    async fn fail_run(
        &self,
        run: &mut WorkflowRun,
        log: &WorkflowStepLog,
        err: &EngineError,
    ) -> Result<(), EngineError> {
        let msg = err.to_string();
        tracing::warn!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            step_id = %log.step_id,
            attempt = log.attempt,
            code = err.code(),
            error = %msg,
            "step failed permanently"
        );
        let closing = StepClose {
            log_id: log.id,
            status: StepLogStatus::Failed,
            output: Some(json!({ "error_code": err.code() })),
            error: Some(msg.clone()),
            at: self.runs.now(),
        };
        let result = self
            .runs
            .terminate(run, Some(&closing), RunStatus::Failed, Some(&msg))
            .await;
        self.guarded(result, &closing).await
    }

    /// On a lost race, record `closing` on the orphaned log and pass the
    /// error through.
    async fn guarded<T>(
        &self,
        result: Result<T, EngineError>,
        closing: &StepClose,
    ) -> Result<T, EngineError> {
        if let Err(EngineError::RunAlreadyTerminal(run_id)) = &result {
            tracing::info!(run_id = %run_id, log_id = %closing.log_id, "run ended while step was in flight");
            self.runs.close_orphan(closing).await;
        }
        result
    }
}
