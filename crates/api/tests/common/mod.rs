#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use manimai_api::config::ServerConfig;
use manimai_api::router::build_app_router;
use manimai_api::state::AppState;
use manimai_db::models::job::Job;
use manimai_db::repositories::JobRepo;
use manimai_db::{create_pool, run_migrations, DbPool};
use manimai_events::EventBus;
use manimai_llm::{CompletionRequest, LlmProvider, ProviderError};
use manimai_pipeline::generator::Generator;
use manimai_pipeline::renderer::{RenderFailure, RenderRequest, RenderedSegment, SceneRenderer};
use manimai_worker::{JobScheduler, SchedulerSettings};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

// ---------------------------------------------------------------------------
// Pipeline fakes
// ---------------------------------------------------------------------------

/// Answers every prompt with a scene that prints the prompt.
struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let text = request
            .user_prompt
            .lines()
            .find_map(|l| {
                l.strip_prefix("Create a new manim scene that implements: ")
                    .or_else(|| l.strip_prefix("Request: "))
            })
            .unwrap_or_default()
            .to_string();
        if request.user_prompt.contains("```python") {
            Ok(format!("```python\n# <<SECTION_BREAK>>\nself.add(Text(\"{text}\"))\n```"))
        } else {
            Ok(format!(
                "```python\nclass Demo(Scene):\n    def construct(self):\n        self.add(Text(\"{text}\"))\n```"
            ))
        }
    }
}

/// Succeeds at once unless the scene mentions `broken` (render error) or
/// `forever` (runs until cancelled).
struct InstantRenderer;

#[async_trait]
impl SceneRenderer for InstantRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
    ) -> Result<RenderedSegment, RenderFailure> {
        if request.scene_code.contains("broken") {
            return Err(RenderFailure::error("manim exited with code 1"));
        }
        if request.scene_code.contains("forever") {
            cancel.cancelled().await;
            return Err(RenderFailure::Cancelled);
        }
        Ok(RenderedSegment {
            artifact_path: PathBuf::from(format!("/fake/{}.mp4", request.job_id)),
            duration_ms: Some(2000),
            output: request.output,
        })
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub scheduler: JobScheduler,
    pub bus: Arc<EventBus>,
    _dir: TempDir,
}

/// The full application router, backed by a fresh SQLite file and a
/// scheduler wired to in-process fakes.
pub async fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = create_pool(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");

    let bus = Arc::new(EventBus::default());
    let scheduler = JobScheduler::new(
        pool.clone(),
        Arc::clone(&bus),
        Arc::new(Generator::new(Arc::new(EchoProvider), Duration::from_secs(5))),
        Arc::new(InstantRenderer),
        SchedulerSettings {
            pool_size: 2,
            cancel_grace: Duration::from_millis(500),
        },
    );

    let config = test_config();
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        scheduler: scheduler.clone(),
        event_bus: Arc::clone(&bus),
    };

    TestApp {
        router: build_app_router(state, &config),
        pool,
        scheduler,
        bus,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.scheduler.wait_idle())
            .await
            .expect("scheduler did not become idle");
    }

    /// The stored row, bypassing the API view.
    pub async fn job_row(&self, id: i64) -> Job {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .expect("job query")
            .expect("job exists")
    }

    /// Create a workspace through the API and return its id.
    pub async fn create_workspace(&self, name: &str) -> i64 {
        let response = post_json(&self.router, "/api/v1/workspaces", serde_json::json!({ "name": name })).await;
        let json = body_json(response).await;
        json["data"]["id"].as_i64().expect("workspace id")
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

pub async fn delete(router: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

pub async fn post_empty(router: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
