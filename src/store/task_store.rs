//! Durable task store (C1).
//!
//! Row-per-job state machine over the `ai_tasks` table (§6.4). Every
//! transition is a single `UPDATE ... WHERE state = $expected` so the
//! compare-and-set is enforced by the database itself — there are no
//! in-memory job locks (§5 "Locking discipline").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::{Job, JobState};
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task {0} is in a state that does not permit this transition")]
    StateConflict(Uuid),
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl TaskStoreError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::NotFound(_) => ErrorKind::TaskNotFound,
            Self::Unavailable(_) => ErrorKind::StoreUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskStoreError>;

/// Filter accepted by [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<JobState>,
    pub kind: Option<String>,
}

#[derive(Debug, FromRow)]
struct JobRow {
    task_id: Uuid,
    kind: String,
    related_id: Uuid,
    state: String,
    progress: i32,
    step: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    error_kind: Option<String>,
    cost_usd: f64,
    tokens_in: i64,
    tokens_out: i64,
    duration_s: Option<f64>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    creator_id: String,
    provider_id: Option<Uuid>,
    provider_name: Option<String>,
    model: Option<String>,
    trace_id: Uuid,
}

impl JobRow {
    fn into_job(self) -> Job {
        Job {
            task_id: self.task_id,
            kind: self.kind,
            related_id: self.related_id,
            state: parse_state(&self.state),
            progress: self.progress.clamp(0, 100) as u8,
            step: self.step,
            result: self.result,
            error: self.error,
            error_kind: self.error_kind.and_then(|k| serde_json::from_value(serde_json::Value::String(k)).ok()),
            cost_usd: self.cost_usd,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            duration_s: self.duration_s,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            creator_id: self.creator_id,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            model: self.model,
            trace_id: self.trace_id,
        }
    }
}

fn parse_state(s: &str) -> JobState {
    match s {
        "pending" => JobState::Pending,
        "processing" => JobState::Processing,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        _ => JobState::Cancelled,
    }
}

/// Fields accepted at job creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub kind: String,
    pub related_id: Uuid,
    pub creator_id: String,
    pub provider_id: Option<Uuid>,
    pub provider_name: Option<String>,
    pub model: Option<String>,
    pub trace_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: PgPool,
}

impl TaskStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `create(kind, payload_metadata, provider, creator) -> task_id` (§4.1).
    pub async fn create(&self, job: NewJob) -> Result<Uuid> {
        self.create_with_id(Uuid::new_v4(), job).await
    }

    /// As [`Self::create`], but with the `task_id` chosen by the caller —
    /// used by the submit endpoint so the idempotency reservation and the
    /// row it guards share one id instead of racing two separately
    /// generated ones.
    pub async fn create_with_id(&self, task_id: Uuid, job: NewJob) -> Result<Uuid> {
        sqlx::query(
            r"
            INSERT INTO ai_tasks
                (task_id, kind, related_id, state, progress, creator_id, provider_id, provider_name, model, trace_id, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, $5, $6, $7, $8, now())
            ",
        )
        .bind(task_id)
        .bind(&job.kind)
        .bind(job.related_id)
        .bind(&job.creator_id)
        .bind(job.provider_id)
        .bind(&job.provider_name)
        .bind(&job.model)
        .bind(job.trace_id)
        .execute(&self.pool)
        .await?;

        Ok(task_id)
    }

    /// `claim(task_id)` — `Pending -> Processing`, or `StateConflict`.
    pub async fn claim(&self, task_id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r"
            UPDATE ai_tasks
            SET state = 'processing', started_at = now()
            WHERE task_id = $1 AND state = 'pending'
            RETURNING *
            ",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_job()),
            None => {
                self.ensure_exists(task_id).await?;
                Err(TaskStoreError::StateConflict(task_id))
            }
        }
    }

    /// `update(task_id, {progress?, step?})` — only while `Processing`;
    /// `progress` is clamped to be monotonically non-decreasing.
    pub async fn update(&self, task_id: Uuid, progress: Option<u8>, step: Option<String>) -> Result<Job> {
        let current = self.get(task_id).await?;
        if current.state != JobState::Processing {
            return Err(TaskStoreError::StateConflict(task_id));
        }

        let next_progress = match progress {
            Some(p) => p.max(current.progress).min(100),
            None => current.progress,
        };
        let next_step = step.or(current.step);

        let row = sqlx::query_as::<_, JobRow>(
            r"
            UPDATE ai_tasks
            SET progress = $2, step = $3
            WHERE task_id = $1 AND state = 'processing'
            RETURNING *
            ",
        )
        .bind(task_id)
        .bind(i32::from(next_progress))
        .bind(&next_step)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).ok_or(TaskStoreError::StateConflict(task_id))
    }

    /// `complete(task_id, result, cost, tokens_in, tokens_out)` — only from `Processing`.
    pub async fn complete(&self, task_id: Uuid, result: serde_json::Value, cost_usd: f64, tokens_in: i64, tokens_out: i64) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r"
            UPDATE ai_tasks
            SET state = 'completed', progress = 100, result = $2, cost_usd = $3,
                tokens_in = $4, tokens_out = $5, completed_at = now(),
                duration_s = EXTRACT(EPOCH FROM (now() - started_at))
            WHERE task_id = $1 AND state = 'processing'
            RETURNING *
            ",
        )
        .bind(task_id)
        .bind(result)
        .bind(cost_usd)
        .bind(tokens_in)
        .bind(tokens_out)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).ok_or(TaskStoreError::StateConflict(task_id))
    }

    /// `fail(task_id, error, error_kind)` — from `Pending` or `Processing`.
    pub async fn fail(&self, task_id: Uuid, error: impl Into<String>, error_kind: ErrorKind) -> Result<Job> {
        let error = error.into();
        let kind_str = error_kind.to_string();
        let row = sqlx::query_as::<_, JobRow>(
            r"
            UPDATE ai_tasks
            SET state = 'failed', error = $2, error_kind = $3, completed_at = now()
            WHERE task_id = $1 AND state IN ('pending', 'processing')
            RETURNING *
            ",
        )
        .bind(task_id)
        .bind(&error)
        .bind(&kind_str)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).ok_or(TaskStoreError::StateConflict(task_id))
    }

    /// `cancel(task_id)` — from `Pending` or `Processing`.
    pub async fn cancel(&self, task_id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r"
            UPDATE ai_tasks
            SET state = 'cancelled', completed_at = now()
            WHERE task_id = $1 AND state IN ('pending', 'processing')
            RETURNING *
            ",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).ok_or(TaskStoreError::StateConflict(task_id))
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM ai_tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).ok_or(TaskStoreError::NotFound(task_id))
    }

    pub async fn list(&self, filter: ListFilter, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let limit = limit.clamp(1, 100);
        let status = filter.status.map(|s| s.to_string());

        let rows = sqlx::query_as::<_, JobRow>(
            r"
            SELECT * FROM ai_tasks
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR kind = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(status)
        .bind(filter.kind)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    /// Reaper sweep (§4.8): any row stuck in `Processing` for ≥ 15 minutes
    /// is failed with the fixed timeout string, regardless of which worker
    /// (if any) still believes it owns the row.
    pub async fn reap_stuck_processing(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE ai_tasks
            SET state = 'failed',
                error = 'Task timed out after 15 minutes - worker may have crashed',
                error_kind = 'worker_timeout',
                completed_at = now()
            WHERE state = 'processing' AND started_at < now() - interval '15 minutes'
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Reaper sweep (§4.8): any row left `Pending` for ≥ 20 minutes with no
    /// worker ever having claimed it is failed with the fixed string.
    pub async fn reap_stale_pending(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE ai_tasks
            SET state = 'failed',
                error = 'Task never started after 20 minutes - no worker available',
                error_kind = 'worker_timeout',
                completed_at = now()
            WHERE state = 'pending' AND created_at < now() - interval '20 minutes'
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Used to distinguish a genuine `StateConflict` from a task that never existed.
    async fn ensure_exists(&self, task_id: Uuid) -> Result<()> {
        let exists: bool = sqlx::query("SELECT EXISTS(SELECT 1 FROM ai_tasks WHERE task_id = $1)")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?
            .get(0);
        if exists {
            Ok(())
        } else {
            Err(TaskStoreError::NotFound(task_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_round_trips_known_values() {
        for s in ["pending", "processing", "completed", "failed", "cancelled"] {
            let state = parse_state(s);
            assert_eq!(state.to_string(), s);
        }
    }

    #[test]
    fn unavailable_error_maps_to_store_unavailable_kind() {
        let err = TaskStoreError::StateConflict(Uuid::new_v4());
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }
}
