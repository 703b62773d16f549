//! One job, start to finish: generate, render, commit.
//!
//! Every exit path leaves the job terminal (or, when the scheduler shuts
//! down before the job started, still pending for the next process to pick
//! up). The workspace context is only ever extended by
//! [`JobRepo::complete`], after the renderer accepted the increment.

use std::sync::Arc;

use manimai_core::failure::{FailureKind, JobFailure};
use manimai_core::types::DbId;
use manimai_db::models::job::Job;
use manimai_db::models::segment::CreateSegment;
use manimai_db::repositories::{JobRepo, WorkspaceRepo};
use manimai_db::DbPool;
use manimai_events::{EventBus, JobEvent};
use manimai_pipeline::generator::{GenerationError, Generator};
use manimai_pipeline::renderer::{RenderRequest, SceneRenderer};
use tokio_util::sync::CancellationToken;

/// Collaborators a job runs against.
pub(crate) struct JobRunner {
    pub pool: DbPool,
    pub bus: Arc<EventBus>,
    pub generator: Arc<Generator>,
    pub renderer: Arc<dyn SceneRenderer>,
}

impl JobRunner {
    /// Drive `job_id` to a terminal state.
    ///
    /// `cancel` fires for a user cancellation and for shutdown; `shutdown`
    /// tells the two apart.
    pub async fn run(
        &self,
        workspace_id: DbId,
        job_id: DbId,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) {
        if let Err(e) = self.execute(job_id, cancel, shutdown).await {
            tracing::error!(job_id, workspace_id, error = %e, "Persistence failed while running job");
            self.record_persistence_failure(workspace_id, job_id, &e).await;
        }
    }

    async fn execute(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<(), sqlx::Error> {
        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            tracing::warn!(job_id, "Queued job no longer exists");
            return Ok(());
        };
        if job.is_terminal() {
            tracing::debug!(job_id, "Queued job is already terminal, skipping");
            return Ok(());
        }

        if cancel.is_cancelled() {
            if shutdown.is_cancelled() {
                // Left pending; recovery resumes it.
                return Ok(());
            }
            return self.finish_cancelled(&job).await;
        }

        if !JobRepo::mark_running(&self.pool, job_id).await? {
            tracing::debug!(job_id, "Job was no longer pending");
            return Ok(());
        }
        let workspace_id = job.workspace_id;
        self.bus.publish(JobEvent::started(workspace_id, job_id));
        tracing::info!(job_id, workspace_id, "Job started");

        // --- Generate ---
        let context = WorkspaceRepo::code_context(&self.pool, workspace_id).await?;
        let generated = match self.generator.generate(&context, &job.prompt, cancel).await {
            Ok(generated) => generated,
            Err(GenerationError::Cancelled) => return self.stop(&job, shutdown).await,
            Err(e) => return self.fail(&job, e.to_job_failure()).await,
        };
        JobRepo::record_generation(&self.pool, job_id, &generated).await?;
        tracing::debug!(
            job_id,
            model = %generated.model,
            code_len = generated.code.len(),
            "Code generated",
        );

        // --- Render the candidate context ---
        let scene_code = match context.with_increment(&generated.code).compose() {
            Ok(code) => code,
            Err(e) => {
                let failure = JobFailure::new(
                    FailureKind::RenderError,
                    format!("Generated code does not fit the workspace scene: {e}"),
                )
                .with_diagnostics(Some(generated.code.clone()));
                return self.fail(&job, failure).await;
            }
        };
        let output = match job.output_params() {
            Ok(output) => output,
            Err(e) => {
                let failure = JobFailure::new(
                    FailureKind::PersistenceError,
                    format!("Stored output parameters are invalid: {e}"),
                );
                return self.fail(&job, failure).await;
            }
        };

        let request = RenderRequest {
            workspace_id,
            job_id,
            scene_code,
            output,
        };
        let rendered = match self.renderer.render(request, cancel.clone()).await {
            Ok(rendered) => rendered,
            Err(failure) => {
                return match failure.to_job_failure() {
                    Some(failure) => self.fail(&job, failure).await,
                    None => self.stop(&job, shutdown).await,
                };
            }
        };

        // --- Commit ---
        let segment = CreateSegment {
            job_id,
            workspace_id,
            artifact_path: rendered.artifact_path.to_string_lossy().into_owned(),
            duration_ms: rendered.duration_ms,
            output: rendered.output,
        };
        let (_job, segment) = JobRepo::complete(&self.pool, job_id, &segment, &generated.code).await?;
        tracing::info!(
            job_id,
            workspace_id,
            segment_id = segment.id,
            artifact = %segment.artifact_path,
            "Job succeeded",
        );
        self.bus.publish(JobEvent::succeeded(segment));
        Ok(())
    }

    /// A running job whose work was abandoned on `cancel`.
    async fn stop(&self, job: &Job, shutdown: &CancellationToken) -> Result<(), sqlx::Error> {
        if shutdown.is_cancelled() {
            let failure = JobFailure::new(
                FailureKind::Interrupted,
                "Worker shut down while the job was running",
            );
            return self.fail(job, failure).await;
        }
        self.finish_cancelled(job).await
    }

    async fn finish_cancelled(&self, job: &Job) -> Result<(), sqlx::Error> {
        if JobRepo::cancel(&self.pool, job.id).await? {
            tracing::info!(job_id = job.id, workspace_id = job.workspace_id, "Job cancelled");
            self.bus.publish(JobEvent::cancelled(job.workspace_id, job.id));
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, failure: JobFailure) -> Result<(), sqlx::Error> {
        tracing::warn!(
            job_id = job.id,
            workspace_id = job.workspace_id,
            kind = %failure.kind,
            message = %failure.message,
            "Job failed",
        );
        if JobRepo::fail(&self.pool, job.id, &failure).await? {
            self.bus
                .publish(JobEvent::failed(job.workspace_id, job.id, &failure));
        }
        Ok(())
    }

    /// Best effort: the store just failed once, it may fail again.
    async fn record_persistence_failure(&self, workspace_id: DbId, job_id: DbId, err: &sqlx::Error) {
        let failure = JobFailure::new(
            FailureKind::PersistenceError,
            format!("Could not persist job state: {err}"),
        );
        match JobRepo::fail(&self.pool, job_id, &failure).await {
            Ok(true) => self
                .bus
                .publish(JobEvent::failed(workspace_id, job_id, &failure)),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id, error = %e, "Could not record persistence failure");
            }
        }
    }
}
