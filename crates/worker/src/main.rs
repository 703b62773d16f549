//! Headless worker: resumes persisted pending jobs, drains them and exits.

use std::process::ExitCode;
use std::sync::Arc;

use manimai_worker::config::WorkerConfig;
use manimai_worker::telemetry::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing("manimai_worker=debug,manimai_pipeline=debug,manimai_llm=info");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        pool_size = config.pool_size,
        data_dir = %config.data_dir.display(),
        llm = ?config.llm,
        "Loaded worker configuration",
    );

    let pool = match manimai_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = manimai_db::run_migrations(&pool).await {
        tracing::error!(error = %e, "Failed to run database migrations");
        return ExitCode::FAILURE;
    }
    tracing::info!("Database migrations applied");

    let bus = Arc::new(manimai_events::EventBus::default());
    let scheduler = match manimai_worker::build_scheduler(&config, pool, Arc::clone(&bus)) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build scheduler");
            return ExitCode::FAILURE;
        }
    };

    let report = match scheduler.recover().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Failed to recover persisted jobs");
            return ExitCode::FAILURE;
        }
    };
    if report.resumed.is_empty() {
        tracing::info!("No pending jobs");
    }

    tokio::select! {
        _ = scheduler.wait_idle() => tracing::info!("All pending jobs finished"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, stopping running jobs"),
    }
    scheduler.shutdown().await;
    ExitCode::SUCCESS
}
