//! Repository for the `segments` table.

use chrono::Utc;
use manimai_core::types::DbId;
use sqlx::SqliteConnection;

use crate::models::segment::{CreateSegment, Segment};
use crate::DbPool;

/// Column list for `segments` queries.
const COLUMNS: &str = "\
    id, job_id, workspace_id, artifact_path, duration_ms, \
    width, height, frame_rate, quality, created_at";

/// Provides CRUD operations for rendered segments.
pub struct SegmentRepo;

impl SegmentRepo {
    /// Insert a segment on its own.
    pub async fn create(pool: &DbPool, input: &CreateSegment) -> Result<Segment, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::insert(&mut conn, input).await
    }

    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        input: &CreateSegment,
    ) -> Result<Segment, sqlx::Error> {
        let query = format!(
            "INSERT INTO segments \
                 (job_id, workspace_id, artifact_path, duration_ms, \
                  width, height, frame_rate, quality, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Segment>(&query)
            .bind(input.job_id)
            .bind(input.workspace_id)
            .bind(&input.artifact_path)
            .bind(input.duration_ms)
            .bind(i64::from(input.output.width))
            .bind(i64::from(input.output.height))
            .bind(i64::from(input.output.frame_rate))
            .bind(input.output.quality.as_str())
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Segment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM segments WHERE id = ?");
        sqlx::query_as::<_, Segment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_job(pool: &DbPool, job_id: DbId) -> Result<Option<Segment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM segments WHERE job_id = ?");
        sqlx::query_as::<_, Segment>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Segments of a workspace in their jobs' creation order.
    pub async fn list_by_workspace(
        pool: &DbPool,
        workspace_id: DbId,
    ) -> Result<Vec<Segment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM segments \
             WHERE workspace_id = ? \
             ORDER BY job_id ASC"
        );
        sqlx::query_as::<_, Segment>(&query)
            .bind(workspace_id)
            .fetch_all(pool)
            .await
    }
}
