//! Cron scheduling for the resume sweep and schedule triggers.
//!
//! The engine itself never sleeps on a run: suspension is persisted data.
//! This module only provides the periodic *callers* a deployment may want:
//! a job that invokes `process_due_steps`, and per-workflow jobs that emit
//! schedule ticks. Both are keyed jobs on a `tokio-cron-scheduler` instance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job registered under this key.
    #[error("job '{0}' not registered in scheduler")]
    JobNotFound(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a human-readable schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds|minutes|hours"
/// - "every minute", "every hour", "every day", "hourly", "daily"
/// - "every day at HH:MM"
///
/// Five-field cron expressions get a leading seconds field; six-field
/// expressions pass through unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    match parts.len() {
        5 => return Ok(format!("0 {trimmed}")),
        6 => return Ok(trimmed.to_string()),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let rest = lower.strip_prefix("every ").ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("unrecognized schedule format: '{trimmed}'"))
    })?;

    if let Some(at_part) = rest.strip_prefix("day at ") {
        let (hour, minute) = at_part.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour < 24 && minute < 60 {
            return Ok(format!("0 {minute} {hour} * * *"));
        }
        return Err(invalid());
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    if let [count, unit] = words.as_slice() {
        let n: u32 = count.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(SchedulerError::InvalidSchedule(
                "interval must be > 0".to_string(),
            ));
        }
        return match unit.trim_end_matches('s') {
            "second" => Ok(format!("*/{n} * * * * *")),
            "minute" => Ok(format!("0 */{n} * * * *")),
            "hour" => Ok(format!("0 0 */{n} * * *")),
            _ => Err(invalid()),
        };
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Callback invoked with the fire time each time a job triggers.
pub type CronCallback = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered job.
struct ScheduledJob {
    /// The job UUID assigned by tokio-cron-scheduler.
    job_id: Uuid,
    cron_expr: String,
}

/// Keyed cron jobs on top of `tokio-cron-scheduler::JobScheduler`.
pub struct CronScheduler {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    jobs: Arc<RwLock<HashMap<String, ScheduledJob>>>,
}

impl CronScheduler {
    /// Create a new cron scheduler (not yet started).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the scheduler. Must be called before scheduling jobs.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);

        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and forget all jobs.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    /// Register `callback` under `key` on a cron or human-readable schedule.
    ///
    /// Re-registering an existing key replaces the previous job.
    pub async fn schedule_job(
        &self,
        key: &str,
        schedule: &str,
        callback: CronCallback,
    ) -> Result<(), SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        if self.jobs.read().await.contains_key(key) {
            self.unschedule_job(key).await?;
        }

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let job_key = key.to_string();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let cb = callback.clone();
            let job_key = job_key.clone();
            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!(job = %job_key, %now, "cron job fired");
                cb(now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        self.jobs.write().await.insert(
            key.to_string(),
            ScheduledJob {
                job_id,
                cron_expr: cron_expr.clone(),
            },
        );

        tracing::info!(job = %key, cron = %cron_expr, "job scheduled");
        Ok(())
    }

    /// Remove a job.
    pub async fn unschedule_job(&self, key: &str) -> Result<(), SchedulerError> {
        let entry = self
            .jobs
            .write()
            .await
            .remove(key)
            .ok_or_else(|| SchedulerError::JobNotFound(key.to_string()))?;

        if let Some(scheduler) = self.inner.read().await.as_ref() {
            scheduler
                .remove(&entry.job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        tracing::info!(job = %key, "job unscheduled");
        Ok(())
    }

    /// Normalized cron expression of a registered job.
    pub async fn cron_expression(&self, key: &str) -> Option<String> {
        self.jobs.read().await.get(key).map(|j| j.cron_expr.clone())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cron_fields() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(
            normalize_schedule("30 */5 * * * *").unwrap(),
            "30 */5 * * * *"
        );
    }

    #[test]
    fn test_normalize_intervals() {
        assert_eq!(
            normalize_schedule("every 30 seconds").unwrap(),
            "*/30 * * * * *"
        );
        assert_eq!(
            normalize_schedule("Every 5 Minutes").unwrap(),
            "0 */5 * * * *"
        );
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_schedule("every 1 minute").unwrap(), "0 */1 * * * *");
    }

    #[test]
    fn test_normalize_keywords() {
        assert_eq!(normalize_schedule("every minute").unwrap(), "0 * * * * *");
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("daily").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn test_normalize_day_at_time() {
        assert_eq!(
            normalize_schedule("every day at 09:30").unwrap(),
            "0 30 9 * * *"
        );
        assert!(normalize_schedule("every day at 25:00").is_err());
        assert!(normalize_schedule("every day at noon").is_err());
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_schedule("run whenever").is_err());
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every 3 fortnights").is_err());
    }

    #[tokio::test]
    async fn test_scheduler_start_stop() {
        let scheduler = CronScheduler::new();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.job_count().await, 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_schedule_replace_and_unschedule() {
        let scheduler = CronScheduler::new();
        scheduler.start().await.unwrap();

        let cb: CronCallback = Arc::new(|_at| Box::pin(async {}));
        scheduler
            .schedule_job("sweep", "every 5 minutes", cb.clone())
            .await
            .unwrap();
        scheduler
            .schedule_job("sweep", "every 10 seconds", cb)
            .await
            .unwrap();
        assert_eq!(scheduler.job_count().await, 1);
        assert_eq!(
            scheduler.cron_expression("sweep").await.as_deref(),
            Some("*/10 * * * * *")
        );

        scheduler.unschedule_job("sweep").await.unwrap();
        assert_eq!(scheduler.job_count().await, 0);
        assert!(scheduler.unschedule_job("sweep").await.is_err());

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_schedule_before_start_fails() {
        let scheduler = CronScheduler::new();
        let cb: CronCallback = Arc::new(|_at| Box::pin(async {}));
        assert!(scheduler.schedule_job("sweep", "every minute", cb).await.is_err());
    }
}
