//! Handlers for the `/workspaces` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use manimai_core::error::CoreError;
use manimai_core::types::DbId;
use manimai_core::workspace::validate_workspace_name;
use manimai_db::models::workspace::{CreateWorkspace, Workspace};
use manimai_db::repositories::{SegmentRepo, WorkspaceRepo};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// A workspace with its accumulated code context.
#[derive(Debug, Serialize)]
pub struct WorkspaceDetail {
    #[serde(flatten)]
    pub workspace: Workspace,
    /// Number of accepted increments.
    pub increments: usize,
    /// The increments concatenated in order.
    pub context: String,
    /// The scene file the next render would start from, if any.
    pub scene: Option<String>,
    pub busy: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub removed: u64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) async fn find_workspace(state: &AppState, id: DbId) -> AppResult<Workspace> {
    WorkspaceRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Workspace",
            id,
        }))
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// GET /api/v1/workspaces
pub async fn list_workspaces(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workspaces = WorkspaceRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: workspaces }))
}

/// POST /api/v1/workspaces
///
/// Returns 201 with the created workspace, 409 if the name is taken.
pub async fn create_workspace(
    State(state): State<AppState>,
    Json(input): Json<CreateWorkspace>,
) -> AppResult<impl IntoResponse> {
    validate_workspace_name(&input.name)?;
    if WorkspaceRepo::find_by_name(&state.pool, input.name.trim())
        .await?
        .is_some()
    {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Workspace '{}' already exists",
            input.name.trim()
        ))));
    }

    let workspace = WorkspaceRepo::create(&state.pool, &input).await?;
    tracing::info!(workspace_id = workspace.id, name = %workspace.name, "Workspace created");

    Ok((StatusCode::CREATED, Json(DataResponse { data: workspace })))
}

/// GET /api/v1/workspaces/{id}
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let workspace = find_workspace(&state, id).await?;
    let context = WorkspaceRepo::code_context(&state.pool, id).await?;
    let scene = if context.is_empty() {
        None
    } else {
        Some(context.compose()?)
    };

    Ok(Json(DataResponse {
        data: WorkspaceDetail {
            workspace,
            increments: context.len(),
            context: context.text(),
            scene,
            busy: state.scheduler.is_busy(id).await,
        },
    }))
}

/// DELETE /api/v1/workspaces/{id}
///
/// Cancels queued and running jobs, then deletes the workspace with its
/// jobs and segments. Returns 204.
pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.delete_workspace(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workspaces/{id}/reset
///
/// Discards the accumulated code context. 409 while jobs are queued or
/// running.
pub async fn reset_workspace(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let removed = state.scheduler.reset_workspace(id).await?;
    Ok(Json(DataResponse {
        data: ResetResponse { removed },
    }))
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// GET /api/v1/workspaces/{id}/segments
///
/// Rendered segments in their jobs' creation order.
pub async fn list_segments(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_workspace(&state, id).await?;
    let segments = SegmentRepo::list_by_workspace(&state.pool, id).await?;
    Ok(Json(DataResponse { data: segments }))
}
