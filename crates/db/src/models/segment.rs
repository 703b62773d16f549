//! Segment entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use manimai_core::error::CoreError;
use manimai_core::output::OutputParams;
use manimai_core::types::{DbId, Timestamp};

/// A row from the `segments` table: the rendered video of one job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Segment {
    pub id: DbId,
    pub job_id: DbId,
    pub workspace_id: DbId,
    pub artifact_path: String,
    /// Probed duration. Null when probing was unavailable.
    pub duration_ms: Option<i64>,
    pub width: i64,
    pub height: i64,
    pub frame_rate: i64,
    pub quality: String,
    pub created_at: Timestamp,
}

impl Segment {
    pub fn output_params(&self) -> Result<OutputParams, CoreError> {
        OutputParams::from_stored(self.width, self.height, self.frame_rate, &self.quality)
    }
}

/// DTO for recording a rendered segment.
#[derive(Debug, Clone)]
pub struct CreateSegment {
    pub job_id: DbId,
    pub workspace_id: DbId,
    pub artifact_path: String,
    pub duration_ms: Option<i64>,
    pub output: OutputParams,
}
