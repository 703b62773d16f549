//! Handlers for jobs: submission per workspace, then lookup, cancel and
//! retry by job id.
//!
//! Every state change goes through the [`JobScheduler`](manimai_worker::JobScheduler).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use manimai_core::error::CoreError;
use manimai_core::output::{parse_resolution, OutputParams, Quality};
use manimai_core::types::DbId;
use manimai_db::models::job::Job;
use manimai_db::models::status::JobStatus;
use manimai_db::repositories::JobRepo;
use manimai_worker::CancelOutcome;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::handlers::workspaces::find_workspace;
use crate::response::DataResponse;
use crate::state::AppState;

/// A job as returned by the API: the stored row plus its status name.
///
/// Generated code is exposed only once it was committed, i.e. for a
/// succeeded job.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub status: &'static str,
    pub generated_code: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let status = job.status();
        let generated_code = match status {
            Some(JobStatus::Succeeded) => job.generated_code.clone(),
            _ => None,
        };
        Self {
            status: status.map_or("unknown", |s| s.name()),
            job,
            generated_code,
        }
    }
}

/// Body of `POST /workspaces/{id}/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub prompt: String,
    #[serde(default)]
    pub output: Option<OutputRequest>,
}

/// Optional output overrides; anything omitted takes the default.
#[derive(Debug, Default, Deserialize)]
pub struct OutputRequest {
    /// `WIDTHxHEIGHT`, e.g. `1280x720`.
    pub resolution: Option<String>,
    pub frame_rate: Option<u32>,
    pub quality: Option<Quality>,
}

impl OutputRequest {
    fn into_params(self) -> Result<OutputParams, CoreError> {
        let mut params = OutputParams::default();
        if let Some(resolution) = self.resolution {
            let (width, height) = parse_resolution(&resolution)?;
            params.width = width;
            params.height = height;
        }
        if let Some(frame_rate) = self.frame_rate {
            params.frame_rate = frame_rate;
        }
        if let Some(quality) = self.quality {
            params.quality = quality;
        }
        Ok(params)
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub outcome: &'static str,
    pub job: JobView,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(state: &AppState, job_id: DbId) -> AppResult<Job> {
    JobRepo::find_by_id(&state.pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        }))
}

// ---------------------------------------------------------------------------
// Submit / list
// ---------------------------------------------------------------------------

/// POST /api/v1/workspaces/{id}/jobs
///
/// Validates and queues a prompt. Returns 202 with the pending job; the
/// outcome arrives on the workspace event stream.
pub async fn submit_job(
    State(state): State<AppState>,
    Path(workspace_id): Path<DbId>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let output = input.output.unwrap_or_default().into_params()?;
    let job = state
        .scheduler
        .submit(workspace_id, &input.prompt, output)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobView::from(job),
        }),
    ))
}

/// GET /api/v1/workspaces/{id}/jobs
///
/// Jobs of the workspace in submission order.
pub async fn list_workspace_jobs(
    State(state): State<AppState>,
    Path(workspace_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_workspace(&state, workspace_id).await?;
    let jobs: Vec<JobView> = JobRepo::list_by_workspace(&state.pool, workspace_id)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, job_id).await?;
    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// A pending job is cancelled at once (200). A running job is signalled
/// and 202 is returned; the final status arrives as an event. 409 if the
/// job is already terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.scheduler.cancel(job_id).await?;
    let status = match outcome {
        CancelOutcome::Dequeued => StatusCode::OK,
        CancelOutcome::Signalled => StatusCode::ACCEPTED,
        CancelOutcome::AlreadyTerminal => {
            return Err(AppError::Core(CoreError::Conflict(
                "Job is already in a terminal state and cannot be cancelled".into(),
            )));
        }
    };
    let job = find_job(&state, job_id).await?;

    Ok((
        status,
        Json(DataResponse {
            data: CancelResponse {
                outcome: outcome.as_str(),
                job: JobView::from(job),
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Queue a new job with the prompt and output parameters of a failed or
/// cancelled one. The new job has `retry_of_job_id` pointing to the
/// original. Returns 202.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.scheduler.retry(job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobView::from(job),
        }),
    ))
}
