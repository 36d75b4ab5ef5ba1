//! MediaVault server binary.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediavault_server::config::ServerConfig;
use mediavault_server::mirror::spawn_mirror_worker;
use mediavault_server::{app, create_router};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("MediaVault v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let services = app::build(&config).await?;
    let shutdown = CancellationToken::new();

    let worker = spawn_mirror_worker(
        services.state.engine.mirror().clone(),
        services.mirror_rx,
        config.retry_policy(),
        shutdown.clone(),
    );
    if let Some(interval) = config.reconcile_interval() {
        services
            .state
            .sweep
            .clone()
            .spawn_periodic(interval, shutdown.clone());
        tracing::info!(interval_secs = interval.as_secs(), "Reconciliation sweep scheduled");
    }

    let router = create_router(services.state);
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Mirror worker ended abnormally");
    }
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
