//! Workspace entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use manimai_core::types::{DbId, Timestamp};

/// A row from the `workspaces` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Workspace {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a workspace via `POST /api/v1/workspaces`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
}

/// A row from the `code_increments` table: one accepted turn of scene code.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CodeIncrement {
    pub id: DbId,
    pub workspace_id: DbId,
    /// Job that produced the increment. Null once that job is gone.
    pub job_id: Option<DbId>,
    /// Zero-based position within the workspace.
    pub position: i64,
    pub code: String,
    pub created_at: Timestamp,
}
