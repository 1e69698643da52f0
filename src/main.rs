use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use clipper_chat::config::Settings;
use clipper_chat::server::{create_app, AppState};
use clipper_chat::shutdown::GracefulShutdown;
use clipper_chat::tasks::MaintenanceTask;
use clipper_chat::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let state = AppState::from_settings(settings.clone()).await?;
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let maintenance = MaintenanceTask::new(
        Duration::from_secs(settings.ratelimit.cleanup_interval_seconds.max(1)),
        state.rate_limiter.clone(),
        state.chat.clone(),
        shutdown_tx.subscribe(),
    );
    let maintenance_handle = tokio::spawn(maintenance.run());

    let graceful = GracefulShutdown::new(
        state.chat.clone(),
        shutdown_tx,
        Duration::from_secs(settings.shutdown.drain_timeout_seconds),
    );

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Hubs are closed and connections drained before the listener stops
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal().await;
            let result = graceful.execute(reason).await;
            if !result.is_clean() {
                tracing::warn!(remaining = result.remaining, "Exiting with open connections");
            }
        })
        .await?;

    let _ = maintenance_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "interrupt"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "terminate"
        }
    }
}
