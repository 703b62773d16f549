//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /{id}            -> get_job
/// POST   /{id}/cancel     -> cancel_job
/// POST   /{id}/retry      -> retry_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/retry", post(jobs::retry_job))
}
