#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use manimai_db::models::job::Job;
use manimai_db::models::status::JobStatus;
use manimai_db::models::workspace::{CreateWorkspace, Workspace};
use manimai_db::repositories::{JobRepo, WorkspaceRepo};
use manimai_db::{create_pool, run_migrations, DbPool};
use manimai_events::EventBus;
use manimai_llm::{CompletionRequest, LlmProvider, ProviderError, ProviderErrorKind};
use manimai_pipeline::generator::Generator;
use manimai_pipeline::renderer::{RenderFailure, RenderRequest, RenderedSegment, SceneRenderer};
use manimai_worker::{JobScheduler, SchedulerSettings};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted language model
// ---------------------------------------------------------------------------

/// Answers with code derived from the request text.
///
/// Prompts steer failures: `no-code` answers without a fenced block,
/// `provider-down` fails the call and `slow-gen` never answers.
#[derive(Default)]
pub struct ScriptedProvider {
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Request texts in call order.
    pub fn requests(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| request_text(&c.user_prompt))
            .collect()
    }
}

fn request_text(user_prompt: &str) -> String {
    if let Some(rest) = user_prompt.strip_prefix("Create a new manim scene that implements: ") {
        return rest.lines().next().unwrap_or_default().to_string();
    }
    user_prompt
        .lines()
        .find_map(|line| line.strip_prefix("Request: "))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(request.clone());
        let text = request_text(&request.user_prompt);
        let first_turn = !request.user_prompt.contains("```python");

        match text.as_str() {
            "no-code" => return Ok("I would rather not.".to_string()),
            "provider-down" => {
                return Err(ProviderError::new(
                    "scripted",
                    ProviderErrorKind::Transport,
                    "connection refused",
                ))
            }
            "slow-gen" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            _ => {}
        }

        if first_turn {
            Ok(format!(
                "```python\nclass Demo(Scene):\n    def construct(self):\n        self.add(Text(\"{text}\"))\n```"
            ))
        } else {
            Ok(format!(
                "```python\n# <<SECTION_BREAK>>\nself.add(Text(\"{text}\"))\n```"
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Fake renderer
// ---------------------------------------------------------------------------

/// One render call as seen by [`FakeRenderer`].
#[derive(Debug, Clone)]
pub struct RenderCall {
    pub workspace_id: i64,
    pub job_id: i64,
    pub scene_code: String,
}

#[derive(Default)]
struct Tracking {
    calls: Vec<RenderCall>,
    running: usize,
    max_running: usize,
    running_per_workspace: HashMap<i64, usize>,
    max_per_workspace: usize,
}

/// Renders instantly (after `delay`) unless the scene asks otherwise:
/// `render-error`, `render-timeout`, `render-hang` (until cancelled) and
/// `render-stuck` (ignores cancellation).
pub struct FakeRenderer {
    delay: Duration,
    tracking: Mutex<Tracking>,
}

impl FakeRenderer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.tracking.lock().unwrap().calls.clone()
    }

    pub fn max_running(&self) -> usize {
        self.tracking.lock().unwrap().max_running
    }

    pub fn max_per_workspace(&self) -> usize {
        self.tracking.lock().unwrap().max_per_workspace
    }

    fn enter(&self, request: &RenderRequest) {
        let mut t = self.tracking.lock().unwrap();
        t.calls.push(RenderCall {
            workspace_id: request.workspace_id,
            job_id: request.job_id,
            scene_code: request.scene_code.clone(),
        });
        t.running += 1;
        t.max_running = t.max_running.max(t.running);
        let per = t.running_per_workspace.entry(request.workspace_id).or_default();
        *per += 1;
        let per = *per;
        t.max_per_workspace = t.max_per_workspace.max(per);
    }

    fn leave(&self, workspace_id: i64) {
        let mut t = self.tracking.lock().unwrap();
        t.running -= 1;
        if let Some(per) = t.running_per_workspace.get_mut(&workspace_id) {
            *per -= 1;
        }
    }

    async fn outcome(
        &self,
        request: &RenderRequest,
        cancel: CancellationToken,
    ) -> Result<RenderedSegment, RenderFailure> {
        let code = &request.scene_code;
        if code.contains("render-error") {
            return Err(RenderFailure::Error {
                message: "manim exited with code 1".to_string(),
                diagnostics: Some("NameError: name 'Sqaure' is not defined".to_string()),
            });
        }
        if code.contains("render-timeout") {
            return Err(RenderFailure::Timeout {
                timeout_secs: 600,
                diagnostics: Some("Animation 3 still rendering".to_string()),
            });
        }
        if code.contains("render-hang") {
            cancel.cancelled().await;
            return Err(RenderFailure::Cancelled);
        }
        if code.contains("render-stuck") {
            cancel.cancelled().await;
            return Err(RenderFailure::CancelTimeout { grace_ms: 5000 });
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(RenderFailure::Cancelled),
        }
        Ok(RenderedSegment {
            artifact_path: PathBuf::from(format!(
                "/fake/jobs/{}/{}/media/sections/Demo_0000.mp4",
                request.workspace_id, request.job_id
            )),
            duration_ms: Some(1500),
            output: request.output,
        })
    }
}

#[async_trait]
impl SceneRenderer for FakeRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
    ) -> Result<RenderedSegment, RenderFailure> {
        self.enter(&request);
        let result = self.outcome(&request, cancel).await;
        self.leave(request.workspace_id);
        result
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pool: DbPool,
    pub bus: Arc<EventBus>,
    pub scheduler: JobScheduler,
    pub provider: Arc<ScriptedProvider>,
    pub renderer: Arc<FakeRenderer>,
    _dir: TempDir,
}

pub async fn test_pool() -> (DbPool, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = create_pool(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    (pool, dir)
}

pub async fn harness(pool_size: usize, render_delay: Duration) -> Harness {
    let (pool, dir) = test_pool().await;
    harness_with_pool(pool, dir, pool_size, render_delay)
}

pub fn harness_with_pool(
    pool: DbPool,
    dir: TempDir,
    pool_size: usize,
    render_delay: Duration,
) -> Harness {
    let bus = Arc::new(EventBus::default());
    let provider = Arc::new(ScriptedProvider::default());
    let renderer = Arc::new(FakeRenderer::new(render_delay));
    let generator = Arc::new(Generator::new(provider.clone(), Duration::from_secs(10)));
    let scheduler = JobScheduler::new(
        pool.clone(),
        Arc::clone(&bus),
        generator,
        renderer.clone(),
        SchedulerSettings {
            pool_size,
            cancel_grace: Duration::from_millis(500),
        },
    );
    Harness {
        pool,
        bus,
        scheduler,
        provider,
        renderer,
        _dir: dir,
    }
}

impl Harness {
    pub async fn workspace(&self, name: &str) -> Workspace {
        WorkspaceRepo::create(
            &self.pool,
            &CreateWorkspace {
                name: name.to_string(),
            },
        )
        .await
        .unwrap()
    }

    pub async fn job(&self, id: i64) -> Job {
        JobRepo::find_by_id(&self.pool, id).await.unwrap().unwrap()
    }

    /// Poll until the job reaches `status`.
    pub async fn wait_for_status(&self, id: i64, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.job(id).await;
            if job.status() == Some(status) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {:?}, expected {status:?}",
                job.status()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the scheduler to drain, failing the test after 10 s.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.scheduler.wait_idle())
            .await
            .expect("scheduler did not become idle");
    }
}
