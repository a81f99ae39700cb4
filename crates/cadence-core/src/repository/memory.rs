//! In-process [`WorkflowRepository`] backed by a single async mutex.
//!
//! Every operation holds the lock for its whole body, so each transition is
//! atomic exactly like a SQL transaction. Used by embedders that do not need
//! durability and by the engine's own tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use cadence_types::error::RepositoryError;
use cadence_types::workflow::{
    RunStatus, StepLogStatus, WaitKind, WorkflowDefinition, WorkflowRun, WorkflowStepLog,
};

use super::workflow::{ClaimOutcome, StepClose, WorkflowRepository};

#[derive(Default)]
struct State {
    definitions: HashMap<Uuid, WorkflowDefinition>,
    /// Insertion order doubles as creation order.
    runs: Vec<WorkflowRun>,
    logs: Vec<WorkflowStepLog>,
}

impl State {
    fn run_mut(&mut self, run_id: &Uuid) -> Option<&mut WorkflowRun> {
        self.runs.iter_mut().find(|r| r.id == *run_id)
    }

    fn log_mut(&mut self, log_id: &Uuid) -> Option<&mut WorkflowStepLog> {
        self.logs.iter_mut().find(|l| l.id == *log_id)
    }

    fn run_status(&self, run_id: &Uuid) -> Option<RunStatus> {
        self.runs.iter().find(|r| r.id == *run_id).map(|r| r.status)
    }

    fn log_status(&self, log_id: &Uuid) -> Option<StepLogStatus> {
        self.logs.iter().find(|l| l.id == *log_id).map(|l| l.status)
    }
}

fn apply_close(log: &mut WorkflowStepLog, close: &StepClose) {
    log.status = close.status;
    log.output = close.output.clone();
    if close.error.is_some() {
        log.error = close.error.clone();
    }
    log.next_retry_at = None;
    log.completed_at = Some(close.at);
}

/// In-memory workflow repository.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    state: Mutex<State>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.definitions.insert(def.id, def.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.state.lock().await.definitions.get(id).cloned())
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let state = self.state.lock().await;
        let mut defs: Vec<WorkflowDefinition> = state
            .definitions
            .values()
            .filter(|d| organization_id.is_none_or(|org| d.organization_id == *org))
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().await.definitions.remove(id).is_some())
    }

    async fn create_run(
        &self,
        run: &WorkflowRun,
        first_log: &WorkflowStepLog,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(key) = &run.trigger_key {
            let duplicate = state.runs.iter().any(|r| {
                r.workflow_id == run.workflow_id
                    && r.contact_id == run.contact_id
                    && r.trigger_key.as_deref() == Some(key.as_str())
            });
            if duplicate {
                return Err(RepositoryError::Conflict(format!(
                    "run already exists for trigger '{key}'"
                )));
            }
        }
        state.runs.push(run.clone());
        state.logs.push(first_log.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == *run_id).cloned())
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .filter(|r| workflow_id.is_none_or(|id| r.workflow_id == *id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_run_by_trigger_key(
        &self,
        workflow_id: &Uuid,
        contact_id: &Uuid,
        trigger_key: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .find(|r| {
                r.workflow_id == *workflow_id
                    && r.contact_id == *contact_id
                    && r.trigger_key.as_deref() == Some(trigger_key)
            })
            .cloned())
    }

    async fn get_step_log(
        &self,
        log_id: &Uuid,
    ) -> Result<Option<WorkflowStepLog>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.logs.iter().find(|l| l.id == *log_id).cloned())
    }

    async fn list_step_logs(
        &self,
        run_id: &Uuid,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.run_id == *run_id)
            .cloned()
            .collect())
    }

    async fn list_due_step_logs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let state = self.state.lock().await;
        let mut due: Vec<WorkflowStepLog> = state
            .logs
            .iter()
            .filter(|l| {
                l.status == StepLogStatus::Waiting && l.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|l| l.next_retry_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_stalled_step_logs(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| {
                matches!(l.status, StepLogStatus::Pending | StepLogStatus::Running)
                    && l.updated_at < before
                    && state.run_status(&l.run_id) == Some(RunStatus::Running)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn start_step(&self, log_id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.log_mut(log_id) {
            Some(log) if log.status == StepLogStatus::Pending => {
                log.status = StepLogStatus::Running;
                log.started_at = at;
                log.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn claim_step(
        &self,
        run_id: &Uuid,
        log_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.log_status(log_id) != Some(StepLogStatus::Waiting) {
            return Ok(ClaimOutcome::Lost);
        }
        if state.run_status(run_id) != Some(RunStatus::Waiting) {
            return Ok(ClaimOutcome::RunNotWaiting);
        }
        if let Some(log) = state.log_mut(log_id) {
            log.status = StepLogStatus::Running;
            log.next_retry_at = None;
            log.updated_at = at;
            if log.wait_kind == Some(WaitKind::Delay) {
                log.started_at = at;
            }
        }
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Running;
        }
        Ok(ClaimOutcome::Claimed)
    }

    async fn advance_step(
        &self,
        run_id: &Uuid,
        close: &StepClose,
        next: &WorkflowStepLog,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.run_status(run_id) != Some(RunStatus::Running) {
            return Err(RepositoryError::Conflict("run is not running".to_string()));
        }
        if state.log_status(&close.log_id) != Some(StepLogStatus::Running) {
            return Err(RepositoryError::Conflict(
                "step log is not running".to_string(),
            ));
        }
        if let Some(log) = state.log_mut(&close.log_id) {
            apply_close(log, close);
        }
        if let Some(run) = state.run_mut(run_id) {
            run.current_step_id = next.step_id.clone();
            run.status = if next.status == StepLogStatus::Waiting {
                RunStatus::Waiting
            } else {
                RunStatus::Running
            };
        }
        state.logs.push(next.clone());
        Ok(())
    }

    async fn suspend_step(
        &self,
        run_id: &Uuid,
        log_id: &Uuid,
        wake_at: DateTime<Utc>,
        kind: WaitKind,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.run_status(run_id) != Some(RunStatus::Running) {
            return Err(RepositoryError::Conflict("run is not running".to_string()));
        }
        if !matches!(
            state.log_status(log_id),
            Some(StepLogStatus::Pending | StepLogStatus::Running)
        ) {
            return Err(RepositoryError::Conflict("step log is not open".to_string()));
        }
        if let Some(log) = state.log_mut(log_id) {
            log.status = StepLogStatus::Waiting;
            log.next_retry_at = Some(wake_at);
            log.wait_kind = Some(kind);
            log.error = error.map(str::to_string);
        }
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Waiting;
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        close: Option<&StepClose>,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.run_status(run_id) != Some(RunStatus::Running) {
            return Err(RepositoryError::Conflict("run is not running".to_string()));
        }
        if let Some(close) = close {
            if let Some(log) = state.log_mut(&close.log_id).filter(|l| !l.status.is_terminal()) {
                apply_close(log, close);
            }
        }
        if let Some(run) = state.run_mut(run_id) {
            run.status = status;
            run.error = error.map(str::to_string);
            run.ended_at = Some(at);
        }
        Ok(())
    }

    async fn cancel_run(&self, run_id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.run_status(run_id) {
            None => return Err(RepositoryError::NotFound),
            Some(RunStatus::Running | RunStatus::Waiting) => {}
            Some(_) => return Ok(false),
        }
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Cancelled;
            run.ended_at = Some(at);
        }
        for log in state.logs.iter_mut().filter(|l| {
            l.run_id == *run_id
                && matches!(l.status, StepLogStatus::Pending | StepLogStatus::Waiting)
        }) {
            log.status = StepLogStatus::Skipped;
            log.error = Some("run cancelled".to_string());
            log.next_retry_at = None;
            log.completed_at = Some(at);
        }
        Ok(true)
    }

    async fn close_step_log(&self, close: &StepClose) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        match state.log_mut(&close.log_id) {
            Some(log) if log.status == StepLogStatus::Running => {
                apply_close(log, close);
                Ok(())
            }
            Some(_) => Err(RepositoryError::Conflict(
                "step log is not running".to_string(),
            )),
            None => Err(RepositoryError::NotFound),
        }
    }
}
