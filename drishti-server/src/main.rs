// Drishti camera server

use anyhow::Context;
use clap::Parser;
use drishti_core::DrishtiConfig;
use drishti_server::http::{create_router, ApiState};
use drishti_server::startup::build_service;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drishti-server")]
#[command(about = "Multi-camera ingestion server with object detection", long_about = None)]
struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.listen_addr
    #[arg(short, long)]
    listen: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = DrishtiConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if config.cameras.is_empty() {
        warn!("No cameras configured");
    }

    let service = build_service(&config).await?;
    for (camera_id, e) in service.supervisor().start_all() {
        error!(camera_id = %camera_id, error = %e, "Camera failed to start");
    }

    let app = create_router(ApiState::new(service.clone()));
    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    // camera workers are OS threads; waiting on them must not block the runtime
    let timeout = config.shutdown_timeout();
    let report = tokio::task::spawn_blocking(move || service.shutdown(timeout)).await?;
    if report.is_clean() {
        info!(stopped = report.stopped.len(), "All cameras stopped");
    } else {
        warn!(
            stopped = report.stopped.len(),
            abandoned = ?report.abandoned,
            "Some cameras did not stop in time"
        );
    }
    Ok(())
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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

    info!("Shutdown signal received");
}
