//! Runtime error taxonomy of the engine.

use uuid::Uuid;

use cadence_types::error::RepositoryError;

/// Errors raised while creating, driving or resuming runs.
///
/// `ConcurrentResumeConflict` and `RunAlreadyTerminal` describe lost races;
/// the resumer treats them as skips rather than failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is inactive")]
    WorkflowInactive(Uuid),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("no branch of step '{step_id}' matches label '{label}'")]
    NoMatchingBranch { step_id: String, label: String },

    #[error("step '{step_id}' failed: {message}")]
    StepActionFailed {
        step_id: String,
        message: String,
        retryable: bool,
    },

    #[error("step budget of {0} exhausted in one pass")]
    MaxStepsExceeded(u32),

    #[error("step log {0} was claimed by another worker")]
    ConcurrentResumeConflict(Uuid),

    #[error("run {0} is already terminal")]
    RunAlreadyTerminal(Uuid),

    /// A successor or the current position names a step the snapshot lacks.
    #[error("step '{0}' does not exist in the workflow")]
    MissingStep(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// Stable machine-readable code, recorded on failed step logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::WorkflowNotFound(_) => "workflow_not_found",
            EngineError::WorkflowInactive(_) => "workflow_inactive",
            EngineError::RunNotFound(_) => "run_not_found",
            EngineError::NoMatchingBranch { .. } => "no_matching_branch",
            EngineError::StepActionFailed { .. } => "step_action_failed",
            EngineError::MaxStepsExceeded(_) => "max_steps_exceeded",
            EngineError::ConcurrentResumeConflict(_) => "concurrent_resume_conflict",
            EngineError::RunAlreadyTerminal(_) => "run_already_terminal",
            EngineError::MissingStep(_) => "missing_step",
            EngineError::InvalidWorkflow(_) => "invalid_workflow",
            EngineError::Repository(_) => "repository_error",
        }
    }

    /// Lost races that callers should treat as a no-op.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrentResumeConflict(_) | EngineError::RunAlreadyTerminal(_)
        )
    }
}
