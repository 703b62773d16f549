//! Route definitions for the `/workspaces` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, workspaces};
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/workspaces`.
///
/// ```text
/// GET    /                -> list_workspaces
/// POST   /                -> create_workspace
/// GET    /{id}            -> get_workspace
/// DELETE /{id}            -> delete_workspace
/// POST   /{id}/reset      -> reset_workspace
/// GET    /{id}/jobs       -> list_workspace_jobs
/// POST   /{id}/jobs       -> submit_job
/// GET    /{id}/segments   -> list_segments
/// GET    /{id}/events     -> events_handler (WebSocket)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/{id}",
            get(workspaces::get_workspace).delete(workspaces::delete_workspace),
        )
        .route("/{id}/reset", post(workspaces::reset_workspace))
        .route(
            "/{id}/jobs",
            get(jobs::list_workspace_jobs).post(jobs::submit_job),
        )
        .route("/{id}/segments", get(workspaces::list_segments))
        .route("/{id}/events", get(ws::events_handler))
}
