use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use manimai_api::config::ServerConfig;
use manimai_api::router::build_app_router;
use manimai_api::state::AppState;
use manimai_worker::config::WorkerConfig;
use manimai_worker::telemetry::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing("manimai_api=debug,manimai_worker=debug,manimai_pipeline=debug,tower_http=debug");

    // --- Configuration ---
    let (config, worker_config) = match (ServerConfig::from_env(), WorkerConfig::from_env()) {
        (Ok(config), Ok(worker_config)) => (config, worker_config),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = match manimai_db::create_pool(&worker_config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Database connection pool created");

    if let Err(e) = manimai_db::run_migrations(&pool).await {
        tracing::error!(error = %e, "Failed to run database migrations");
        return ExitCode::FAILURE;
    }
    tracing::info!("Database migrations applied");

    // --- Event bus + scheduler ---
    let event_bus = Arc::new(manimai_events::EventBus::default());
    let scheduler =
        match manimai_worker::build_scheduler(&worker_config, pool.clone(), Arc::clone(&event_bus)) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build scheduler");
                return ExitCode::FAILURE;
            }
        };
    if let Err(e) = scheduler.recover().await {
        tracing::error!(error = %e, "Failed to recover persisted jobs");
        return ExitCode::FAILURE;
    }

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        scheduler: scheduler.clone(),
        event_bus,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = match config.host.parse() {
        Ok(ip) => SocketAddr::new(ip, config.port),
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            return ExitCode::FAILURE;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind to address");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Starting server");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping jobs");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(grace, scheduler.shutdown()).await.is_err() {
        tracing::warn!(timeout_secs = config.shutdown_timeout_secs, "Scheduler did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
    ExitCode::SUCCESS
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
