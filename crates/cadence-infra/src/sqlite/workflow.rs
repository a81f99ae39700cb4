//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `cadence-core` using sqlx with split
//! read/write pools. Definitions and run snapshots are stored as JSON blobs.
//! Every transition runs in one transaction on the writer; conditional
//! updates decide lost races through `rows_affected`.

use cadence_core::repository::workflow::{ClaimOutcome, StepClose, WorkflowRepository};
use cadence_types::error::RepositoryError;
use cadence_types::workflow::{
    RunStatus, StepLogStatus, WaitKind, WorkflowDefinition, WorkflowRun, WorkflowStepLog,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, RepositoryError> {
        self.pool.writer.begin().await.map_err(query_err)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRunRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    organization_id: String,
    contact_id: String,
    status: String,
    current_step_id: String,
    trigger_type: String,
    trigger_key: Option<String>,
    trigger_payload: Option<String>,
    snapshot: String,
    error: Option<String>,
    started_at: String,
    ended_at: Option<String>,
}

impl WorkflowRunRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            organization_id: row.try_get("organization_id")?,
            contact_id: row.try_get("contact_id")?,
            status: row.try_get("status")?,
            current_step_id: row.try_get("current_step_id")?,
            trigger_type: row.try_get("trigger_type")?,
            trigger_key: row.try_get("trigger_key")?,
            trigger_payload: row.try_get("trigger_payload")?,
            snapshot: row.try_get("snapshot")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        let status: RunStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let snapshot: WorkflowDefinition = serde_json::from_str(&self.snapshot)
            .map_err(|e| RepositoryError::Query(format!("invalid run snapshot JSON: {e}")))?;

        Ok(WorkflowRun {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            organization_id: parse_uuid(&self.organization_id)?,
            contact_id: parse_uuid(&self.contact_id)?,
            status,
            current_step_id: self.current_step_id,
            trigger_type: self.trigger_type,
            trigger_key: self.trigger_key,
            trigger_payload: parse_json_opt(self.trigger_payload.as_deref(), "trigger_payload")?,
            snapshot,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepLogRow {
    id: String,
    run_id: String,
    step_id: String,
    step_type: String,
    status: String,
    attempt: i64,
    idempotency_key: String,
    wait_kind: Option<String>,
    next_retry_at: Option<String>,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    updated_at: String,
}

impl StepLogRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            step_type: row.try_get("step_type")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            idempotency_key: row.try_get("idempotency_key")?,
            wait_kind: row.try_get("wait_kind")?,
            next_retry_at: row.try_get("next_retry_at")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_step_log(self) -> Result<WorkflowStepLog, RepositoryError> {
        let wait_kind = self
            .wait_kind
            .as_deref()
            .map(str::parse::<WaitKind>)
            .transpose()
            .map_err(RepositoryError::Query)?;

        Ok(WorkflowStepLog {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            step_type: self.step_type.parse().map_err(RepositoryError::Query)?,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            attempt: u32::try_from(self.attempt)
                .map_err(|_| RepositoryError::Query(format!("invalid attempt: {}", self.attempt)))?,
            idempotency_key: self.idempotency_key,
            wait_kind,
            next_retry_at: self.next_retry_at.as_deref().map(parse_datetime).transpose()?,
            output: parse_json_opt(self.output.as_deref(), "output")?,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        _ => RepositoryError::Query(e.to_string()),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form, so string comparison in SQL is chronological.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json_opt(
    s: Option<&str>,
    what: &str,
) -> Result<Option<serde_json::Value>, RepositoryError> {
    s.map(|s| {
        serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what}: {e}")))
    })
    .transpose()
}

fn to_json(value: &impl serde::Serialize) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn conflict(what: &str) -> RepositoryError {
    RepositoryError::Conflict(what.to_string())
}

async fn insert_step_log(
    tx: &mut Transaction<'static, Sqlite>,
    log: &WorkflowStepLog,
) -> Result<(), RepositoryError> {
    let output = log.output.as_ref().map(to_json).transpose()?;
    sqlx::query(
        r#"INSERT INTO workflow_step_logs
           (id, run_id, step_id, step_type, status, attempt, idempotency_key, wait_kind,
            next_retry_at, output, error, started_at, completed_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(log.id.to_string())
    .bind(log.run_id.to_string())
    .bind(&log.step_id)
    .bind(log.step_type.as_str())
    .bind(log.status.as_str())
    .bind(i64::from(log.attempt))
    .bind(&log.idempotency_key)
    .bind(log.wait_kind.map(|k| k.as_str()))
    .bind(log.next_retry_at.as_ref().map(format_datetime))
    .bind(&output)
    .bind(&log.error)
    .bind(format_datetime(&log.started_at))
    .bind(log.completed_at.as_ref().map(format_datetime))
    .bind(format_datetime(&log.updated_at))
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Apply `close` to a log that is still open. Returns whether a row changed.
async fn close_open_log(
    tx: &mut Transaction<'static, Sqlite>,
    close: &StepClose,
    only_running: bool,
) -> Result<bool, RepositoryError> {
    let output = close.output.as_ref().map(to_json).transpose()?;
    let filter = if only_running {
        "status = 'running'"
    } else {
        "status IN ('pending', 'running', 'waiting')"
    };
    let sql = format!(
        "UPDATE workflow_step_logs
         SET status = ?, output = ?, error = COALESCE(?, error), next_retry_at = NULL,
             completed_at = ?
         WHERE id = ? AND {filter}"
    );
    let result = sqlx::query(&sql)
        .bind(close.status.as_str())
        .bind(&output)
        .bind(&close.error)
        .bind(format_datetime(&close.at))
        .bind(close.log_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(query_err)?;
    Ok(result.rows_affected() > 0)
}

fn runs_from(rows: &[SqliteRow]) -> Result<Vec<WorkflowRun>, RepositoryError> {
    rows.iter()
        .map(|row| WorkflowRunRow::from_row(row).map_err(query_err)?.into_run())
        .collect()
}

fn logs_from(rows: &[SqliteRow]) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
    rows.iter()
        .map(|row| StepLogRow::from_row(row).map_err(query_err)?.into_step_log())
        .collect()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def)?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO workflows (id, organization_id, name, active, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 organization_id = excluded.organization_id,
                 name = excluded.name,
                 active = excluded.active,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(def.id.to_string())
        .bind(def.organization_id.to_string())
        .bind(&def.name)
        .bind(def.active)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            let json: String = row.try_get("definition").map_err(query_err)?;
            serde_json::from_str(&json).map_err(|e| {
                RepositoryError::Query(format!("invalid workflow definition JSON: {e}"))
            })
        })
        .transpose()
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = match organization_id {
            Some(org) => {
                sqlx::query(
                    "SELECT definition FROM workflows WHERE organization_id = ? ORDER BY name ASC",
                )
                .bind(org.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT definition FROM workflows ORDER BY name ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let json: String = row.try_get("definition").map_err(query_err)?;
                serde_json::from_str(&json).map_err(|e| {
                    RepositoryError::Query(format!("invalid workflow definition JSON: {e}"))
                })
            })
            .collect()
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_run(
        &self,
        run: &WorkflowRun,
        first_log: &WorkflowStepLog,
    ) -> Result<(), RepositoryError> {
        let trigger_payload = run.trigger_payload.as_ref().map(to_json).transpose()?;
        let snapshot = to_json(&run.snapshot)?;

        let mut tx = self.begin().await?;
        sqlx::query(
            r#"INSERT INTO workflow_runs
               (id, workflow_id, workflow_name, organization_id, contact_id, status,
                current_step_id, trigger_type, trigger_key, trigger_payload, snapshot,
                error, started_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&run.workflow_name)
        .bind(run.organization_id.to_string())
        .bind(run.contact_id.to_string())
        .bind(run.status.as_str())
        .bind(&run.current_step_id)
        .bind(&run.trigger_type)
        .bind(&run.trigger_key)
        .bind(&trigger_payload)
        .bind(&snapshot)
        .bind(&run.error)
        .bind(format_datetime(&run.started_at))
        .bind(run.ended_at.as_ref().map(format_datetime))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        insert_step_log(&mut tx, first_log).await?;
        tx.commit().await.map_err(query_err)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| WorkflowRunRow::from_row(&row).map_err(query_err)?.into_run())
            .transpose()
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&Uuid>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = match workflow_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM workflow_runs WHERE workflow_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
                )
                .bind(id.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM workflow_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        runs_from(&rows)
    }

    async fn find_run_by_trigger_key(
        &self,
        workflow_id: &Uuid,
        contact_id: &Uuid,
        trigger_key: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_runs WHERE workflow_id = ? AND contact_id = ? AND trigger_key = ?",
        )
        .bind(workflow_id.to_string())
        .bind(contact_id.to_string())
        .bind(trigger_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| WorkflowRunRow::from_row(&row).map_err(query_err)?.into_run())
            .transpose()
    }

    async fn get_step_log(
        &self,
        log_id: &Uuid,
    ) -> Result<Option<WorkflowStepLog>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_step_logs WHERE id = ?")
            .bind(log_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| StepLogRow::from_row(&row).map_err(query_err)?.into_step_log())
            .transpose()
    }

    async fn list_step_logs(
        &self,
        run_id: &Uuid,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_step_logs WHERE run_id = ? ORDER BY rowid ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        logs_from(&rows)
    }

    async fn list_due_step_logs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_step_logs
               WHERE status = 'waiting' AND next_retry_at IS NOT NULL AND next_retry_at <= ?
               ORDER BY next_retry_at ASC, rowid ASC
               LIMIT ?"#,
        )
        .bind(format_datetime(&now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        logs_from(&rows)
    }

    async fn list_stalled_step_logs(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowStepLog>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT l.* FROM workflow_step_logs l
               JOIN workflow_runs r ON r.id = l.run_id
               WHERE l.status IN ('pending', 'running') AND l.updated_at < ? AND r.status = 'running'
               ORDER BY l.updated_at ASC
               LIMIT ?"#,
        )
        .bind(format_datetime(&before))
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        logs_from(&rows)
    }

    async fn start_step(&self, log_id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let at = format_datetime(&at);
        let result = sqlx::query(
            "UPDATE workflow_step_logs SET status = 'running', started_at = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(&at)
        .bind(&at)
        .bind(log_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_step_log(log_id).await? {
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
        let mut tx = self.begin().await?;

        // A log entered after a delay has not run yet; its step starts now.
        let claimed = sqlx::query(
            r#"UPDATE workflow_step_logs
               SET status = 'running', next_retry_at = NULL, updated_at = ?1,
                   started_at = CASE WHEN wait_kind = 'delay' THEN ?1 ELSE started_at END
               WHERE id = ?2 AND status = 'waiting'"#,
        )
        .bind(format_datetime(&at))
        .bind(log_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Ok(ClaimOutcome::Lost);
        }

        let run = sqlx::query(
            "UPDATE workflow_runs SET status = 'running' WHERE id = ? AND status = 'waiting'",
        )
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if run.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Ok(ClaimOutcome::RunNotWaiting);
        }

        tx.commit().await.map_err(query_err)?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn advance_step(
        &self,
        run_id: &Uuid,
        close: &StepClose,
        next: &WorkflowStepLog,
    ) -> Result<(), RepositoryError> {
        let run_status = if next.status == StepLogStatus::Waiting {
            RunStatus::Waiting
        } else {
            RunStatus::Running
        };

        let mut tx = self.begin().await?;
        let moved = sqlx::query(
            "UPDATE workflow_runs SET current_step_id = ?, status = ? WHERE id = ? AND status = 'running'",
        )
        .bind(&next.step_id)
        .bind(run_status.as_str())
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if moved.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Err(conflict("run is not running"));
        }

        if !close_open_log(&mut tx, close, true).await? {
            tx.rollback().await.map_err(query_err)?;
            return Err(conflict("step log is not running"));
        }

        insert_step_log(&mut tx, next).await?;
        tx.commit().await.map_err(query_err)
    }

    async fn suspend_step(
        &self,
        run_id: &Uuid,
        log_id: &Uuid,
        wake_at: DateTime<Utc>,
        kind: WaitKind,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        let run = sqlx::query(
            "UPDATE workflow_runs SET status = 'waiting' WHERE id = ? AND status = 'running'",
        )
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if run.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Err(conflict("run is not running"));
        }

        let log = sqlx::query(
            r#"UPDATE workflow_step_logs
               SET status = 'waiting', next_retry_at = ?, wait_kind = ?, error = ?
               WHERE id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(format_datetime(&wake_at))
        .bind(kind.as_str())
        .bind(error)
        .bind(log_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if log.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Err(conflict("step log is not open"));
        }

        tx.commit().await.map_err(query_err)
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        close: Option<&StepClose>,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = ?, error = ?, ended_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(format_datetime(&at))
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Err(conflict("run is not running"));
        }

        if let Some(close) = close {
            close_open_log(&mut tx, close, false).await?;
        }
        tx.commit().await.map_err(query_err)
    }

    async fn cancel_run(&self, run_id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let at = format_datetime(&at);
        let mut tx = self.begin().await?;

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;
        if status.is_none() {
            tx.rollback().await.map_err(query_err)?;
            return Err(RepositoryError::NotFound);
        }

        let result = sqlx::query(
            "UPDATE workflow_runs SET status = 'cancelled', ended_at = ? WHERE id = ? AND status IN ('running', 'waiting')",
        )
        .bind(&at)
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Ok(false);
        }

        sqlx::query(
            r#"UPDATE workflow_step_logs
               SET status = 'skipped', error = 'run cancelled', next_retry_at = NULL, completed_at = ?
               WHERE run_id = ? AND status IN ('pending', 'waiting')"#,
        )
        .bind(&at)
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    async fn close_step_log(&self, close: &StepClose) -> Result<(), RepositoryError> {
        let mut tx = self.begin().await?;
        let closed = close_open_log(&mut tx, close, true).await?;
        tx.commit().await.map_err(query_err)?;
        if closed {
            return Ok(());
        }
        match self.get_step_log(&close.log_id).await? {
            Some(_) => Err(conflict("step log is not running")),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
