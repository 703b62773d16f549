use std::sync::Arc;

use manimai_events::EventBus;
use manimai_worker::JobScheduler;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: manimai_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Job scheduler; the only writer of job status.
    pub scheduler: JobScheduler,
    /// Job lifecycle events, fanned out to WebSocket subscribers.
    pub event_bus: Arc<EventBus>,
}
