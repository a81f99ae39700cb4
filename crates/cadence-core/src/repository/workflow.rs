//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions, runs and step
//! logs. The infrastructure layer (cadence-infra) implements this trait with
//! SQLite persistence; [`super::memory`] provides an in-process version.
//!
//! Every run/step-log transition is a single atomic operation. Conditional
//! transitions report a lost race as [`RepositoryError::Conflict`], never by
//! silently doing nothing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use cadence_types::error::RepositoryError;
use cadence_types::workflow::{
    RunStatus, StepLogStatus, WaitKind, WorkflowDefinition, WorkflowRun, WorkflowStepLog,
};

/// Terminal update applied to an open step log.
#[derive(Debug, Clone, PartialEq)]
pub struct StepClose {
    pub log_id: Uuid,
    pub status: StepLogStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of an optimistic claim on a waiting step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The log (and its run) moved from `waiting` to `running`.
    Claimed,
    /// Another worker already claimed the log.
    Lost,
    /// The log was still waiting but its run no longer is (e.g. cancelled).
    RunNotWaiting,
}

/// Repository trait for workflow persistence.
///
/// Covers three entity families:
/// - **Definitions:** CRUD for workflow definitions.
/// - **Runs:** creation, lookup and the lifecycle transitions.
/// - **Step logs:** lookup, due-selection and the optimistic claim.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List definitions, optionally restricted to one organization.
    fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    ///
    /// Runs keep their snapshot and are unaffected.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a run together with its first step log.
    ///
    /// Fails with `Conflict` when a run with the same
    /// `(workflow_id, contact_id, trigger_key)` already exists.
    fn create_run(
        &self,
        run: &WorkflowRun,
        first_log: &WorkflowStepLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// List runs, newest first, optionally for one workflow.
    fn list_runs(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Find the run created for a trigger occurrence, if any.
    fn find_run_by_trigger_key(
        &self,
        workflow_id: &Uuid,
        contact_id: &Uuid,
        trigger_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step logs
    // -----------------------------------------------------------------------

    fn get_step_log(
        &self,
        log_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowStepLog>, RepositoryError>> + Send;

    /// All step logs of a run in creation order.
    fn list_step_logs(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStepLog>, RepositoryError>> + Send;

    /// Waiting step logs with `next_retry_at <= now`, earliest first.
    fn list_due_step_logs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStepLog>, RepositoryError>> + Send;

    /// Pending or running step logs of running runs last taken over before
    /// `before` (see [`WorkflowStepLog::updated_at`]).
    ///
    /// These belong to executor passes that died mid-flight.
    fn list_stalled_step_logs(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStepLog>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Move a `pending` log to `running`. Returns `false` if it was not pending.
    fn start_step(
        &self,
        log_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Compare-and-swap a `waiting` log and its `waiting` run to `running`.
    fn claim_step(
        &self,
        run_id: &Uuid,
        log_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ClaimOutcome, RepositoryError>> + Send;

    /// Close the running log, open `next` and move the run's current step to
    /// `next.step_id`, all at once.
    ///
    /// The run status becomes `waiting` when `next` is waiting, `running`
    /// otherwise. `Conflict` when the run is not running or the log is not
    /// running.
    fn advance_step(
        &self,
        run_id: &Uuid,
        close: &StepClose,
        next: &WorkflowStepLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Park an open log as `waiting` until `wake_at` and the run as `waiting`.
    fn suspend_step(
        &self,
        run_id: &Uuid,
        log_id: &Uuid,
        wake_at: DateTime<Utc>,
        kind: WaitKind,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a running run to a terminal status, closing its open log if given.
    fn finish_run(
        &self,
        run_id: &Uuid,
        close: Option<&StepClose>,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Cancel a running or waiting run, skipping its pending/waiting logs.
    ///
    /// Running logs are left for their executor to close. Returns `false`
    /// if the run was already terminal.
    fn cancel_run(
        &self,
        run_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Close a running log without touching its run.
    ///
    /// Records the outcome of an in-flight step whose run was cancelled.
    fn close_step_log(
        &self,
        close: &StepClose,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
