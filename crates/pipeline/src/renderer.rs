//! Rendering toolchain boundary.

use std::path::PathBuf;

use async_trait::async_trait;
use manimai_core::failure::{FailureKind, JobFailure};
use manimai_core::output::OutputParams;
use manimai_core::types::DbId;
use tokio_util::sync::CancellationToken;

/// One composed scene to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub workspace_id: DbId,
    pub job_id: DbId,
    /// Full executable scene: accepted history plus the candidate increment.
    pub scene_code: String,
    pub output: OutputParams,
}

/// Descriptor of a successfully rendered segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSegment {
    pub artifact_path: PathBuf,
    pub duration_ms: Option<i64>,
    pub output: OutputParams,
}

/// Why a render produced no segment.
#[derive(Debug, thiserror::Error)]
pub enum RenderFailure {
    /// The scene raised, the toolchain failed, or no artifact was produced.
    #[error("{message}")]
    Error {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Render exceeded the {timeout_secs}s time limit")]
    Timeout {
        timeout_secs: u64,
        diagnostics: Option<String>,
    },

    /// Termination was confirmed within the grace period.
    #[error("Render cancelled")]
    Cancelled,

    #[error("Render did not stop within {grace_ms} ms of cancellation")]
    CancelTimeout { grace_ms: u64 },
}

impl RenderFailure {
    pub fn error(message: impl Into<String>) -> Self {
        RenderFailure::Error {
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            RenderFailure::Error { diagnostics, .. } | RenderFailure::Timeout { diagnostics, .. } => {
                diagnostics.as_deref()
            }
            RenderFailure::Cancelled | RenderFailure::CancelTimeout { .. } => None,
        }
    }

    /// The terminal failure this render outcome records.
    ///
    /// `None` for [`RenderFailure::Cancelled`], which ends the job as
    /// cancelled rather than failed.
    pub fn to_job_failure(&self) -> Option<JobFailure> {
        let kind = match self {
            RenderFailure::Error { .. } => FailureKind::RenderError,
            RenderFailure::Timeout { .. } => FailureKind::RenderTimeout,
            RenderFailure::CancelTimeout { .. } => FailureKind::CancelTimeout,
            RenderFailure::Cancelled => return None,
        };
        Some(JobFailure::new(kind, self.to_string()).with_diagnostics(self.diagnostics().map(str::to_string)))
    }
}

/// Executes a composed scene in isolation and reports the produced segment.
#[async_trait]
pub trait SceneRenderer: Send + Sync {
    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
    ) -> Result<RenderedSegment, RenderFailure>;
}
