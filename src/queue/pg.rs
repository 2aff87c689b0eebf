//! Postgres-backed job queue
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never receive
//! the same job twice at once; redelivery after a crash is handled by the
//! visibility timeout, which requeues jobs stuck in `active`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{EnqueueOptions, JobHandle, JobQueue, JobState};
use crate::config::QueueConfig;
use crate::error::{EngineError, Result};

/// A job leased to a worker. `attempts` already counts this delivery.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub order_id: Uuid,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
}

/// What the queue decided after a failed attempt
#[derive(Debug)]
pub enum RetryDecision {
    /// Requeued with backoff; the next delivery happens after `delay`
    Requeued { delay: Duration },
    /// Attempts exhausted; the job is failed and will not be redelivered
    Exhausted,
}

/// Exponential backoff from the job's base delay, capped at `max_ms`.
fn backoff_duration(base_ms: i64, attempt: i32, max_ms: u64) -> Duration {
    let base = base_ms.max(0) as u64;
    let exponent = attempt.max(1) as u32 - 1;
    let delay = base.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(delay.min(max_ms))
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Lease the next runnable job, incrementing its attempt counter.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE order_jobs SET
                state = 'active',
                attempts = attempts + 1,
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM order_jobs
                WHERE state = 'pending' AND run_at <= NOW()
                ORDER BY priority ASC, run_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, order_id, attempts, max_attempts, backoff_base_ms
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ClaimedJob {
            id: r.get("id"),
            order_id: r.get("order_id"),
            attempts: r.get("attempts"),
            max_attempts: r.get("max_attempts"),
            backoff_base_ms: r.get("backoff_base_ms"),
        }))
    }

    /// Acknowledge a delivered job as done.
    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_jobs SET
                state = 'completed',
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed attempt: requeue with backoff, or fail the job when
    /// attempts are exhausted.
    #[instrument(skip(self, job), fields(job_id = job.id, order_id = %job.order_id))]
    pub async fn retry(&self, job: &ClaimedJob, error: &str) -> Result<RetryDecision> {
        if job.attempts >= job.max_attempts {
            sqlx::query(
                r#"
                UPDATE order_jobs SET
                    state = 'failed',
                    last_error = $2,
                    locked_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            warn!(
                attempts = job.attempts,
                "job exhausted its attempts: {error}"
            );
            return Ok(RetryDecision::Exhausted);
        }

        let delay = backoff_duration(job.backoff_base_ms, job.attempts, self.config.backoff_max_ms);
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| EngineError::Internal(format!("backoff out of range: {e}")))?;

        sqlx::query(
            r#"
            UPDATE order_jobs SET
                state = 'pending',
                run_at = $2,
                last_error = $3,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        debug!(delay_ms = delay.as_millis() as u64, "job requeued: {error}");
        Ok(RetryDecision::Requeued { delay })
    }

    /// Requeue jobs whose worker died mid-attempt. Returns the number of
    /// jobs put back.
    pub async fn requeue_stale(&self, visibility_timeout: Duration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| EngineError::Internal(format!("visibility timeout out of range: {e}")))?;

        let rows = sqlx::query(
            r#"
            UPDATE order_jobs SET
                state = 'pending',
                run_at = NOW(),
                locked_at = NULL,
                updated_at = NOW()
            WHERE state = 'active' AND locked_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            info!(count = rows, "requeued stale active jobs");
        }
        Ok(rows)
    }

    fn handle_from_row(row: &sqlx::postgres::PgRow) -> Result<JobHandle> {
        let state: String = row.get("state");
        Ok(JobHandle {
            id: row.get("id"),
            order_id: row.get("order_id"),
            state: JobState::try_from_str(&state)
                .ok_or_else(|| EngineError::Internal(format!("unknown job state: {state}")))?,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            run_at: row.get("run_at"),
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, order_id: Uuid, options: EnqueueOptions) -> Result<JobHandle> {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.max_attempts)
            .max(1) as i32;
        let backoff_base_ms = options
            .backoff_base
            .map(|d| d.as_millis() as i64)
            .unwrap_or(self.config.backoff_base_ms as i64);

        let row = sqlx::query(
            r#"
            INSERT INTO order_jobs (
                order_id, state, priority, attempts, max_attempts,
                backoff_base_ms, run_at, created_at, updated_at
            ) VALUES ($1, 'pending', $2, 0, $3, $4, NOW(), NOW(), NOW())
            RETURNING id, order_id, state, attempts, max_attempts, run_at
            "#,
        )
        .bind(order_id)
        .bind(options.priority)
        .bind(max_attempts)
        .bind(backoff_base_ms)
        .fetch_one(&self.pool)
        .await?;

        let handle = Self::handle_from_row(&row)?;
        debug!(job_id = handle.id, %order_id, "enqueued order job");
        Ok(handle)
    }

    async fn list_open(&self, order_id: Uuid) -> Result<Vec<JobHandle>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, state, attempts, max_attempts, run_at
            FROM order_jobs
            WHERE order_id = $1 AND state IN ('pending', 'active')
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::handle_from_row).collect()
    }

    async fn remove(&self, job_id: i64) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE order_jobs SET
                state = 'cancelled',
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state IN ('pending', 'active')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt_and_caps() {
        assert_eq!(backoff_duration(1_000, 1, 60_000), Duration::from_millis(1_000));
        assert_eq!(backoff_duration(1_000, 2, 60_000), Duration::from_millis(2_000));
        assert_eq!(backoff_duration(1_000, 3, 60_000), Duration::from_millis(4_000));
        assert_eq!(backoff_duration(1_000, 7, 60_000), Duration::from_millis(60_000)); // capped
    }

    #[test]
    fn backoff_tolerates_degenerate_inputs() {
        assert_eq!(backoff_duration(-5, 1, 60_000), Duration::from_millis(0));
        assert_eq!(backoff_duration(1_000, 0, 60_000), Duration::from_millis(1_000));
    }
}
