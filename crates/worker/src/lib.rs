//! Job scheduler and worker pool.
//!
//! - [`scheduler::JobScheduler`]: per-workspace FIFO queues, bounded
//!   concurrency across workspaces, cancellation, retry and recovery.
//! - [`config::WorkerConfig`]: environment configuration for the pipeline.
//! - [`telemetry::init_tracing`]: subscriber setup for the binaries.

pub mod config;
pub mod error;
mod execution;
pub mod scheduler;
pub mod telemetry;

pub use error::SchedulerError;
pub use scheduler::{CancelOutcome, JobScheduler, RecoveryReport, SchedulerSettings};

use std::sync::Arc;

use manimai_db::DbPool;
use manimai_events::EventBus;
use manimai_pipeline::manim::ManimRenderer;

use crate::config::{ConfigError, WorkerConfig};

/// Build the production scheduler: configured provider plus manim renderer.
pub fn build_scheduler(
    config: &WorkerConfig,
    pool: DbPool,
    bus: Arc<EventBus>,
) -> Result<JobScheduler, ConfigError> {
    let generator = Arc::new(config.build_generator()?);
    let renderer = Arc::new(ManimRenderer::new(config.manim_config()));
    Ok(JobScheduler::new(
        pool,
        bus,
        generator,
        renderer,
        SchedulerSettings {
            pool_size: config.pool_size,
            cancel_grace: config.cancel_grace,
        },
    ))
}
