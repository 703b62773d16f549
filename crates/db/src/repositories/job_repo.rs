//! Repository for the `jobs` table.
//!
//! Every status change is a conditional update on the current `status_id`,
//! so a terminal row is never written again regardless of caller ordering.

use chrono::Utc;
use manimai_core::failure::JobFailure;
use manimai_core::generation::GenerationResult;
use manimai_core::types::DbId;

use crate::models::job::{CreateJob, Job};
use crate::models::segment::{CreateSegment, Segment};
use crate::models::status::{JobStatus, StatusId};
use crate::repositories::{SegmentRepo, WorkspaceRepo};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, workspace_id, prompt, status_id, \
    width, height, frame_rate, quality, \
    generated_code, model, prompt_hash, segment_id, \
    failure_kind, error_message, diagnostics, retry_of_job_id, \
    created_at, started_at, finished_at";

/// Non-terminal statuses: pending, running.
const ACTIVE_STATUSES: [StatusId; 2] = [JobStatus::Pending as StatusId, JobStatus::Running as StatusId];

/// Provides CRUD operations and lifecycle transitions for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job.
    pub async fn create(
        pool: &DbPool,
        workspace_id: DbId,
        input: &CreateJob,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (workspace_id, prompt, status_id, width, height, frame_rate, quality, \
                  retry_of_job_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(workspace_id)
            .bind(&input.prompt)
            .bind(JobStatus::Pending.id())
            .bind(i64::from(input.output.width))
            .bind(i64::from(input.output.height))
            .bind(i64::from(input.output.frame_rate))
            .bind(input.output.quality.as_str())
            .bind(input.retry_of_job_id)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Jobs of a workspace in creation order.
    pub async fn list_by_workspace(
        pool: &DbPool,
        workspace_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE workspace_id = ? ORDER BY id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(workspace_id)
            .fetch_all(pool)
            .await
    }

    /// Jobs across all workspaces with the given status, in creation order.
    pub async fn list_by_status(
        pool: &DbPool,
        status: JobStatus,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id = ? ORDER BY id ASC");
        sqlx::query_as::<_, Job>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    /// `Pending -> Running`. Returns `false` if the job was not pending.
    pub async fn mark_running(pool: &DbPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = ?, started_at = ? WHERE id = ? AND status_id = ?",
        )
        .bind(JobStatus::Running.id())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store generated code and provenance on a running job.
    pub async fn record_generation(
        pool: &DbPool,
        job_id: DbId,
        generation: &GenerationResult,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET generated_code = ?, model = ?, prompt_hash = ? \
             WHERE id = ? AND status_id = ?",
        )
        .bind(&generation.code)
        .bind(&generation.model)
        .bind(&generation.prompt_hash)
        .bind(job_id)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a non-terminal job as failed.
    ///
    /// No automatic retry is performed. Returns `false` if the job was
    /// already terminal.
    pub async fn fail(
        pool: &DbPool,
        job_id: DbId,
        failure: &JobFailure,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, failure_kind = ?, error_message = ?, diagnostics = ?, \
                 finished_at = ? \
             WHERE id = ? AND status_id IN (?, ?)",
        )
        .bind(JobStatus::Failed.id())
        .bind(failure.kind.as_str())
        .bind(&failure.message)
        .bind(failure.diagnostics.as_deref())
        .bind(Utc::now())
        .bind(job_id)
        .bind(ACTIVE_STATUSES[0])
        .bind(ACTIVE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel a job if it is not already in a terminal state.
    ///
    /// Returns `true` if the job was cancelled.
    pub async fn cancel(pool: &DbPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = ?, finished_at = ? \
             WHERE id = ? AND status_id IN (?, ?)",
        )
        .bind(JobStatus::Cancelled.id())
        .bind(Utc::now())
        .bind(job_id)
        .bind(ACTIVE_STATUSES[0])
        .bind(ACTIVE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Commit a successful render in one transaction.
    ///
    /// Appends `code` to the workspace context, inserts the segment, links it
    /// to the job and marks the job succeeded. If the job is no longer
    /// running nothing is written and `RowNotFound` is returned.
    pub async fn complete(
        pool: &DbPool,
        job_id: DbId,
        segment: &CreateSegment,
        code: &str,
    ) -> Result<(Job, Segment), sqlx::Error> {
        let mut tx = pool.begin().await?;

        WorkspaceRepo::insert_increment(&mut tx, segment.workspace_id, Some(job_id), code).await?;
        let segment = SegmentRepo::insert(&mut tx, segment).await?;

        let query = format!(
            "UPDATE jobs SET status_id = ?, segment_id = ?, finished_at = ? \
             WHERE id = ? AND status_id = ? \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Succeeded.id())
            .bind(segment.id)
            .bind(Utc::now())
            .bind(job_id)
            .bind(JobStatus::Running.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Err(sqlx::Error::RowNotFound);
        };

        tx.commit().await?;
        Ok((job, segment))
    }

    /// Create a new pending job from a finished job's prompt and parameters.
    ///
    /// The new job has `retry_of_job_id` pointing to the original. This is
    /// the only way a job is ever retried.
    pub async fn retry(pool: &DbPool, job_id: DbId) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (workspace_id, prompt, status_id, width, height, frame_rate, quality, \
                  retry_of_job_id, created_at) \
             SELECT workspace_id, prompt, ?, width, height, frame_rate, quality, id, ? \
             FROM jobs WHERE id = ? \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(Utc::now())
            .bind(job_id)
            .fetch_optional(pool)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}
