//! leadscan-server - scan orchestration microservice
//!
//! Accepts scan requests, runs the five-stage intelligence pipeline in the
//! background and serves the reconciled company records over REST.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leadscan_common::config::ServiceConfig;
use leadscan_server::stages::StageSet;
use leadscan_server::AppState;

/// Command-line arguments for leadscan-server
#[derive(Parser, Debug)]
#[command(name = "leadscan-server")]
#[command(about = "Company intelligence scan orchestrator")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "LEADSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Root folder holding the database (overrides config)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_source = ServiceConfig::config_source(args.config.as_deref());
    let mut config = ServiceConfig::load(config_source.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.root_folder {
        config.root_folder = Some(root);
    }
    config.validate()?;

    leadscan_common::logging::init_tracing(&format!(
        "{},tower_http=info",
        config.logging.level
    ))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_profile = env!("BUILD_PROFILE"),
        "Starting leadscan-server"
    );
    match &config_source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => warn!("No config file found, using compiled defaults"),
    }

    let root = config.ensure_root_folder()?;
    info!("Root folder: {}", root.display());

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let pool = leadscan_server::db::init_database_pool(&db_path).await?;

    let scans = leadscan_server::build_scan_service(pool, StageSet::offline(), &config);

    let interrupted = scans
        .jobs()
        .cleanup_stale_jobs()
        .await
        .context("Failed to clean up interrupted scans")?;
    if interrupted > 0 {
        warn!(count = interrupted, "Closed out scans left by previous run");
    }

    let shutdown = CancellationToken::new();
    let watchdog = leadscan_server::build_watchdog(&scans, &config).spawn(shutdown.clone());

    let app = leadscan_server::build_router(AppState::new(scans));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = watchdog.await {
        warn!(error = %e, "Watchdog task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
