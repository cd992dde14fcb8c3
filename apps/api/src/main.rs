//! # QuickPharmaPlus API
//!
//! REST server entry point.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SPA ───► HTTP (8080) ───► axum Router ───► pharma-db ───► SQLite      │
//! │                                  │                                      │
//! │                                  └──► reminder job (interval)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pharma_db::{Database, DbConfig};
use quickpharma_api::services::reminder_service;
use quickpharma_api::{router, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting QuickPharmaPlus API server...");

    // Load configuration
    let config = ApiConfig::load()?;
    info!(
        port = config.http_port,
        db = %config.database_path,
        payments = config.payment_gateway_url.is_some(),
        webhook = config.notify_webhook_url.is_some(),
        "Configuration loaded"
    );

    // Connect to database (runs migrations)
    let db = Database::new(DbConfig::new(&config.database_path).max_connections(config.db_max_connections)).await?;
    info!("Database ready");

    let port = config.http_port;
    let state = AppState::from_config(db.clone(), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reminders = reminder_service::spawn(state.clone(), shutdown_rx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reminders.await {
        error!(error = %e, "Reminder job did not stop cleanly");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
