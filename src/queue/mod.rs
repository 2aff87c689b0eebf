//! Durable job queue for order processing
//!
//! Delivery is at-least-once; ordering across different orders is not
//! guaranteed, only enqueue-after-commit per order. The engine sees the
//! narrow [`JobQueue`] contract; workers drive the Postgres implementation
//! directly.

pub mod pg;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Lifecycle state of a queued job. A `Pending` job with `run_at` in the
/// future is what callers see as "delayed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn try_from_str(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobState::Pending),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to a queued job
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: i64,
    pub order_id: Uuid,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
}

/// Options for enqueueing a job; unset fields fall back to the queue's
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub max_attempts: Option<u32>,
    pub backoff_base: Option<Duration>,
}

/// Narrow queue contract consumed by the order engine.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a "process this order" job. Called only after the order row
    /// is committed.
    async fn enqueue(&self, order_id: Uuid, options: EnqueueOptions) -> Result<JobHandle>;

    /// Pending, delayed, and active jobs for an order.
    async fn list_open(&self, order_id: Uuid) -> Result<Vec<JobHandle>>;

    /// Best-effort removal of a job that has not completed.
    async fn remove(&self, job_id: i64) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [
            JobState::Pending,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(JobState::try_from_str(state.as_str()), Some(state));
        }
        assert_eq!(JobState::try_from_str("bogus"), None);
    }
}
