//! Job entity models and DTOs.

use serde::Serialize;
use sqlx::FromRow;
use manimai_core::error::CoreError;
use manimai_core::failure::FailureKind;
use manimai_core::output::OutputParams;
use manimai_core::types::{DbId, Timestamp};

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub workspace_id: DbId,
    pub prompt: String,
    pub status_id: StatusId,
    pub width: i64,
    pub height: i64,
    pub frame_rate: i64,
    pub quality: String,
    /// Candidate increment recorded before rendering. It only becomes part
    /// of the workspace context when the job succeeds, so it is never
    /// serialized with the row.
    #[serde(skip_serializing)]
    pub generated_code: Option<String>,
    pub model: Option<String>,
    pub prompt_hash: Option<String>,
    pub segment_id: Option<DbId>,
    pub failure_kind: Option<String>,
    pub error_message: Option<String>,
    pub diagnostics: Option<String>,
    pub retry_of_job_id: Option<DbId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// Parsed status. `None` only for a row with an unknown `status_id`.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }

    pub fn output_params(&self) -> Result<OutputParams, CoreError> {
        OutputParams::from_stored(self.width, self.height, self.frame_rate, &self.quality)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind.as_deref().and_then(|k| k.parse().ok())
    }
}

/// DTO for creating a pending job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub prompt: String,
    pub output: OutputParams,
    pub retry_of_job_id: Option<DbId>,
}
