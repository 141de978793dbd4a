use calbackup_server::routes;
use calbackup_server::services::backup_scheduler::BackupScheduler;
use calbackup_server::{AppConfig, AppState};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tool paths and the database target are checked before anything starts.
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting backup server on port {}", config.port);
    tracing::info!(dir = %config.backup_dir.display(), tools = ?config.tools, "Archive settings");

    let state = Arc::new(AppState::new(config.clone())?);

    // Daily backup
    let scheduler = match &config.backup_cron {
        Some(cron) => match start_scheduler(&state, cron).await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to start backup scheduler: {}", e);
                None
            }
        },
        None => None,
    };

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn start_scheduler(state: &AppState, cron: &str) -> anyhow::Result<BackupScheduler> {
    let scheduler = BackupScheduler::new(state.orchestrator.clone()).await?;
    scheduler.schedule_daily(cron).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
