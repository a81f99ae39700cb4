//! Query parameter extractors for list endpoints.

use serde::Deserialize;
use uuid::Uuid;

/// Query parameters for the workflow list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct WorkflowListQuery {
    /// Restrict to one organization.
    pub organization_id: Option<Uuid>,
}

/// Query parameters for run list endpoints.
#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    /// Maximum number of runs to return (default 20).
    #[serde(default = "default_run_limit")]
    pub limit: u32,
}

fn default_run_limit() -> u32 {
    20
}

/// Query parameters for the sweep endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct SweepQuery {
    /// Batch size override; the configured limit applies when absent.
    pub limit: Option<u32>,
}
