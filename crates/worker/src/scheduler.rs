//! Job scheduler and worker pool.
//!
//! Each workspace has an in-memory FIFO of pending job ids and at most one
//! runner task draining it, so jobs of one workspace run strictly one after
//! another. Runners of different workspaces compete for a [`Semaphore`] of
//! `pool_size` permits. The database stays the source of truth for job
//! status; the queues only decide what runs next.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use manimai_core::failure::{FailureKind, JobFailure};
use manimai_core::output::OutputParams;
use manimai_core::types::DbId;
use manimai_core::workspace::validate_prompt;
use manimai_db::models::job::{CreateJob, Job};
use manimai_db::models::status::JobStatus;
use manimai_db::repositories::{JobRepo, WorkspaceRepo};
use manimai_db::DbPool;
use manimai_events::{EventBus, JobEvent};
use manimai_pipeline::generator::Generator;
use manimai_pipeline::renderer::SceneRenderer;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SchedulerError;
use crate::execution::JobRunner;

/// Extra time, beyond the cancel grace, that workspace deletion waits for the
/// running job to wind down.
const DELETE_DRAIN_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pool_size: usize,
    pub cancel_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pool_size: 2,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// What [`JobScheduler::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was pending and will never run.
    Dequeued,
    /// The job is running; it has been asked to stop.
    Signalled,
    AlreadyTerminal,
}

impl CancelOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelOutcome::Dequeued => "dequeued",
            CancelOutcome::Signalled => "signalled",
            CancelOutcome::AlreadyTerminal => "already_terminal",
        }
    }
}

/// Result of [`JobScheduler::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs found running and marked `Failed{Interrupted}`.
    pub interrupted: Vec<DbId>,
    /// Pending jobs put back on their workspace queues.
    pub resumed: Vec<DbId>,
}

struct ActiveJob {
    job_id: DbId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    queues: HashMap<DbId, VecDeque<DbId>>,
    active: HashMap<DbId, ActiveJob>,
    runners: HashSet<DbId>,
}

impl SchedulerState {
    fn is_queued(&self, workspace_id: DbId, job_id: DbId) -> bool {
        self.queues
            .get(&workspace_id)
            .is_some_and(|q| q.contains(&job_id))
    }

    fn is_active(&self, job_id: DbId) -> bool {
        self.active.values().any(|a| a.job_id == job_id)
    }

    fn workspace_busy(&self, workspace_id: DbId) -> bool {
        self.active.contains_key(&workspace_id)
            || self.queues.get(&workspace_id).is_some_and(|q| !q.is_empty())
    }
}

struct Inner {
    runner: JobRunner,
    permits: Arc<Semaphore>,
    cancel_grace: Duration,
    state: Mutex<SchedulerState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Signalled when the last runner retires.
    idle: Notify,
    /// Signalled whenever a job finishes.
    job_finished: Notify,
}

/// Accepts generation requests and drives them through the pipeline.
///
/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        pool: DbPool,
        bus: Arc<EventBus>,
        generator: Arc<Generator>,
        renderer: Arc<dyn SceneRenderer>,
        settings: SchedulerSettings,
    ) -> Self {
        let pool_size = settings.pool_size.max(1);
        Self {
            inner: Arc::new(Inner {
                runner: JobRunner {
                    pool,
                    bus,
                    generator,
                    renderer,
                },
                permits: Arc::new(Semaphore::new(pool_size)),
                cancel_grace: settings.cancel_grace,
                state: Mutex::new(SchedulerState::default()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                idle: Notify::new(),
                job_finished: Notify::new(),
            }),
        }
    }

    fn pool(&self) -> &DbPool {
        &self.inner.runner.pool
    }

    fn bus(&self) -> &EventBus {
        &self.inner.runner.bus
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Persist a pending job and queue it behind the workspace's earlier
    /// jobs. Returns as soon as the job is queued.
    pub async fn submit(
        &self,
        workspace_id: DbId,
        prompt: &str,
        output: OutputParams,
    ) -> Result<Job, SchedulerError> {
        validate_prompt(prompt)?;
        output.validate()?;
        self.ensure_accepting()?;

        WorkspaceRepo::find_by_id(self.pool(), workspace_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("Workspace", workspace_id))?;

        let input = CreateJob {
            prompt: prompt.trim().to_string(),
            output,
            retry_of_job_id: None,
        };
        let job = JobRepo::create(self.pool(), workspace_id, &input).await?;
        tracing::info!(job_id = job.id, workspace_id, "Job submitted");

        self.enqueue(&[&job]).await;
        Ok(job)
    }

    /// Resubmit a failed or cancelled job as a new job.
    pub async fn retry(&self, job_id: DbId) -> Result<Job, SchedulerError> {
        let job = self.find_job(job_id).await?;
        if !matches!(job.status(), Some(JobStatus::Failed | JobStatus::Cancelled)) {
            return Err(SchedulerError::conflict(format!(
                "Only failed or cancelled jobs can be retried (job {job_id} is {})",
                job.status().map_or("unknown", JobStatus::name)
            )));
        }
        self.ensure_accepting()?;

        let retried = JobRepo::retry(self.pool(), job_id).await?;
        tracing::info!(
            job_id = retried.id,
            retry_of_job_id = job_id,
            workspace_id = retried.workspace_id,
            "Job retried",
        );
        self.enqueue(&[&retried]).await;
        Ok(retried)
    }

    fn ensure_accepting(&self) -> Result<(), SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::conflict("Scheduler is shutting down"));
        }
        Ok(())
    }

    async fn find_job(&self, job_id: DbId) -> Result<Job, SchedulerError> {
        JobRepo::find_by_id(self.pool(), job_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("Job", job_id))
    }

    /// Append jobs to their queues, publishing `JobQueued` for each.
    ///
    /// Events are published under the state lock so a runner can never
    /// report a job started before it was reported queued.
    async fn enqueue(&self, jobs: &[&Job]) {
        let mut state = self.inner.state.lock().await;
        for job in jobs {
            let workspace_id = job.workspace_id;
            state.queues.entry(workspace_id).or_default().push_back(job.id);
            self.bus().publish(JobEvent::queued(workspace_id, job.id));

            if state.runners.insert(workspace_id) {
                let inner = Arc::clone(&self.inner);
                self.inner
                    .tracker
                    .spawn(run_workspace(inner, workspace_id));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    pub async fn cancel(&self, job_id: DbId) -> Result<CancelOutcome, SchedulerError> {
        let job = self.find_job(job_id).await?;
        let workspace_id = job.workspace_id;

        {
            let mut state = self.inner.state.lock().await;
            if let Some(queue) = state.queues.get_mut(&workspace_id) {
                if let Some(pos) = queue.iter().position(|&id| id == job_id) {
                    queue.remove(pos);
                    drop(state);
                    self.mark_cancelled(workspace_id, job_id).await?;
                    return Ok(CancelOutcome::Dequeued);
                }
            }
            if let Some(active) = state.active.get(&workspace_id) {
                if active.job_id == job_id {
                    active.cancel.cancel();
                    tracing::info!(job_id, workspace_id, "Cancellation signalled to running job");
                    return Ok(CancelOutcome::Signalled);
                }
            }
        }

        // Neither queued nor running here: pending jobs not yet recovered
        // are cancelled in place, anything else is already finished.
        if self.mark_cancelled(workspace_id, job_id).await? {
            Ok(CancelOutcome::Dequeued)
        } else {
            Ok(CancelOutcome::AlreadyTerminal)
        }
    }

    async fn mark_cancelled(&self, workspace_id: DbId, job_id: DbId) -> Result<bool, sqlx::Error> {
        let cancelled = JobRepo::cancel(self.pool(), job_id).await?;
        if cancelled {
            tracing::info!(job_id, workspace_id, "Pending job cancelled");
            self.bus().publish(JobEvent::cancelled(workspace_id, job_id));
        }
        Ok(cancelled)
    }

    // -----------------------------------------------------------------------
    // Workspace operations
    // -----------------------------------------------------------------------

    /// Clear a workspace's code context. Rejected while it has work queued
    /// or running.
    pub async fn reset_workspace(&self, workspace_id: DbId) -> Result<u64, SchedulerError> {
        WorkspaceRepo::find_by_id(self.pool(), workspace_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("Workspace", workspace_id))?;

        // Held across the reset so no job of this workspace starts meanwhile.
        let state = self.inner.state.lock().await;
        if state.workspace_busy(workspace_id) {
            return Err(SchedulerError::conflict(format!(
                "Workspace {workspace_id} has queued or running jobs"
            )));
        }
        let removed = WorkspaceRepo::reset(self.pool(), workspace_id).await?;
        drop(state);

        tracing::info!(workspace_id, removed, "Workspace context reset");
        Ok(removed)
    }

    /// Cancel everything the workspace has in flight, then delete it with
    /// its jobs and segments.
    pub async fn delete_workspace(&self, workspace_id: DbId) -> Result<(), SchedulerError> {
        WorkspaceRepo::find_by_id(self.pool(), workspace_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("Workspace", workspace_id))?;

        let (queued, running) = {
            let mut state = self.inner.state.lock().await;
            let queued = state.queues.remove(&workspace_id).unwrap_or_default();
            let running = state.active.get(&workspace_id).map(|a| a.cancel.clone());
            (queued, running)
        };

        for job_id in queued {
            self.mark_cancelled(workspace_id, job_id).await?;
        }
        if let Some(cancel) = running {
            cancel.cancel();
            self.wait_workspace_inactive(workspace_id, self.inner.cancel_grace + DELETE_DRAIN_SLACK)
                .await;
        }

        WorkspaceRepo::delete(self.pool(), workspace_id).await?;
        tracing::info!(workspace_id, "Workspace deleted");
        Ok(())
    }

    async fn wait_workspace_inactive(&self, workspace_id: DbId, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.inner.job_finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inner.state.lock().await.active.contains_key(&workspace_id) {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(workspace_id, "Running job did not stop before workspace deletion");
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Reconcile persisted state after a restart.
    ///
    /// Jobs left running by a previous process become `Failed{Interrupted}`;
    /// pending jobs are queued again in creation order.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let mut report = RecoveryReport::default();

        for job in JobRepo::list_by_status(self.pool(), JobStatus::Running).await? {
            if self.inner.state.lock().await.is_active(job.id) {
                continue;
            }
            let failure = JobFailure::new(
                FailureKind::Interrupted,
                "Worker stopped while the job was running",
            );
            if JobRepo::fail(self.pool(), job.id, &failure).await? {
                self.bus()
                    .publish(JobEvent::failed(job.workspace_id, job.id, &failure));
                report.interrupted.push(job.id);
            }
        }

        let pending = JobRepo::list_by_status(self.pool(), JobStatus::Pending).await?;
        let resumable: Vec<&Job> = {
            let state = self.inner.state.lock().await;
            pending
                .iter()
                .filter(|job| !state.is_queued(job.workspace_id, job.id) && !state.is_active(job.id))
                .collect()
        };
        report.resumed = resumable.iter().map(|job| job.id).collect();
        self.enqueue(&resumable).await;

        tracing::info!(
            interrupted = report.interrupted.len(),
            resumed = report.resumed.len(),
            "Recovered persisted jobs",
        );
        Ok(report)
    }

    /// Wait until no workspace has queued or running work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.state.lock().await.runners.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, interrupt running jobs and wait for every
    /// runner to exit. Jobs still queued stay pending for [`recover`](Self::recover).
    pub async fn shutdown(&self) {
        tracing::info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!("Scheduler stopped");
    }

    /// Number of workspaces with a job currently running.
    pub async fn running_count(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    /// Whether the workspace has queued or running jobs.
    pub async fn is_busy(&self, workspace_id: DbId) -> bool {
        self.inner.state.lock().await.workspace_busy(workspace_id)
    }
}

// ---------------------------------------------------------------------------
// Workspace runner
// ---------------------------------------------------------------------------

/// Drain one workspace's queue, one job at a time.
async fn run_workspace(inner: Arc<Inner>, workspace_id: DbId) {
    tracing::debug!(workspace_id, "Workspace runner started");
    loop {
        let permit = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => break,
            },
        };

        let (job_id, cancel) = {
            let mut state = inner.state.lock().await;
            match state.queues.get_mut(&workspace_id).and_then(VecDeque::pop_front) {
                Some(job_id) => {
                    let cancel = inner.shutdown.child_token();
                    state.active.insert(
                        workspace_id,
                        ActiveJob {
                            job_id,
                            cancel: cancel.clone(),
                        },
                    );
                    (job_id, cancel)
                }
                None => {
                    retire(&inner, &mut state, workspace_id);
                    return;
                }
            }
        };
        inner
            .runner
            .run(workspace_id, job_id, &cancel, &inner.shutdown)
            .await;
        drop(permit);

        inner.state.lock().await.active.remove(&workspace_id);
        inner.job_finished.notify_waiters();
    }

    let mut state = inner.state.lock().await;
    retire(&inner, &mut state, workspace_id);
}

fn retire(inner: &Inner, state: &mut SchedulerState, workspace_id: DbId) {
    if state.queues.get(&workspace_id).is_some_and(VecDeque::is_empty) {
        state.queues.remove(&workspace_id);
    }
    state.runners.remove(&workspace_id);
    tracing::debug!(workspace_id, "Workspace runner finished");
    if state.runners.is_empty() {
        inner.idle.notify_waiters();
    }
}
