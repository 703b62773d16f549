//! Repository for the `workspaces` and `code_increments` tables.

use chrono::Utc;
use manimai_core::context::CodeContext;
use manimai_core::types::DbId;
use sqlx::SqliteConnection;

use crate::models::workspace::{CodeIncrement, CreateWorkspace, Workspace};
use crate::DbPool;

/// Column list for `workspaces` queries.
const COLUMNS: &str = "id, name, created_at, updated_at";

/// Column list for `code_increments` queries.
const INCREMENT_COLUMNS: &str = "id, workspace_id, job_id, position, code, created_at";

/// Provides CRUD operations for workspaces and their accepted code.
pub struct WorkspaceRepo;

impl WorkspaceRepo {
    /// Insert a new workspace. The name is stored trimmed.
    pub async fn create(pool: &DbPool, input: &CreateWorkspace) -> Result<Workspace, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO workspaces (name, created_at, updated_at) \
             VALUES (?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Workspace>(&query)
            .bind(input.name.trim())
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &DbPool, id: DbId) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workspaces WHERE id = ?");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(pool: &DbPool, name: &str) -> Result<Option<Workspace>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workspaces WHERE name = ?");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(name.trim())
            .fetch_optional(pool)
            .await
    }

    /// List all workspaces, oldest first.
    pub async fn list(pool: &DbPool) -> Result<Vec<Workspace>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workspaces ORDER BY id ASC");
        sqlx::query_as::<_, Workspace>(&query).fetch_all(pool).await
    }

    /// Delete a workspace. Jobs, segments and increments cascade.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(pool: &DbPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Accepted increments in append order.
    pub async fn increments(
        pool: &DbPool,
        workspace_id: DbId,
    ) -> Result<Vec<CodeIncrement>, sqlx::Error> {
        let query = format!(
            "SELECT {INCREMENT_COLUMNS} FROM code_increments \
             WHERE workspace_id = ? \
             ORDER BY position ASC"
        );
        sqlx::query_as::<_, CodeIncrement>(&query)
            .bind(workspace_id)
            .fetch_all(pool)
            .await
    }

    /// The workspace's cumulative code context.
    pub async fn code_context(pool: &DbPool, workspace_id: DbId) -> Result<CodeContext, sqlx::Error> {
        let increments = Self::increments(pool, workspace_id).await?;
        Ok(CodeContext::new(
            increments.into_iter().map(|inc| inc.code).collect(),
        ))
    }

    /// Append an increment to the workspace's context.
    ///
    /// Successful jobs append through [`JobRepo::complete`](crate::repositories::JobRepo::complete)
    /// instead, which records the increment in the same transaction as the
    /// job's outcome.
    pub async fn append_code_context(
        pool: &DbPool,
        workspace_id: DbId,
        job_id: Option<DbId>,
        code: &str,
    ) -> Result<CodeIncrement, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let increment = Self::insert_increment(&mut tx, workspace_id, job_id, code).await?;
        tx.commit().await?;
        Ok(increment)
    }

    /// Insert an increment at the next position and touch the workspace.
    ///
    /// The stored code ends with exactly one newline.
    pub(crate) async fn insert_increment(
        conn: &mut SqliteConnection,
        workspace_id: DbId,
        job_id: Option<DbId>,
        code: &str,
    ) -> Result<CodeIncrement, sqlx::Error> {
        let now = Utc::now();
        let code = format!("{}\n", code.trim_end_matches('\n'));

        let query = format!(
            "INSERT INTO code_increments (workspace_id, job_id, position, code, created_at) \
             SELECT ?, ?, COALESCE(MAX(position) + 1, 0), ?, ? \
             FROM code_increments WHERE workspace_id = ? \
             RETURNING {INCREMENT_COLUMNS}"
        );
        let increment = sqlx::query_as::<_, CodeIncrement>(&query)
            .bind(workspace_id)
            .bind(job_id)
            .bind(&code)
            .bind(now)
            .bind(workspace_id)
            .fetch_one(&mut *conn)
            .await?;

        sqlx::query("UPDATE workspaces SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(workspace_id)
            .execute(&mut *conn)
            .await?;

        Ok(increment)
    }

    /// Explicit reset: discard every accepted increment.
    ///
    /// Jobs and segments are kept as history. Returns the number of
    /// increments removed.
    pub async fn reset(pool: &DbPool, workspace_id: DbId) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let result = sqlx::query("DELETE FROM code_increments WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE workspaces SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
