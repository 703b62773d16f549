pub mod health;
pub mod jobs;
pub mod workspaces;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /workspaces                                      list, create
/// /workspaces/{id}                                 get, delete
/// /workspaces/{id}/reset                           reset code context (POST)
/// /workspaces/{id}/jobs                            list, submit
/// /workspaces/{id}/segments                        list
/// /workspaces/{id}/events                          WebSocket job events
///
/// /jobs/{id}                                       get
/// /jobs/{id}/cancel                                cancel (POST)
/// /jobs/{id}/retry                                 retry (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/workspaces", workspaces::router())
        .nest("/jobs", jobs::router())
}
