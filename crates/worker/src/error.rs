use manimai_core::error::CoreError;
use manimai_core::types::DbId;

/// Failure of a scheduler operation requested by a caller.
///
/// Failures inside a job never surface here; they end the job instead.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl SchedulerError {
    pub(crate) fn not_found(entity: &'static str, id: DbId) -> Self {
        SchedulerError::Core(CoreError::NotFound { entity, id })
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        SchedulerError::Core(CoreError::Conflict(message.into()))
    }
}
