//! hcb-analyzer (Audio Analysis) microservice
//!
//! Accepts audio by URL, inline upload, chunked upload or stored asset name,
//! runs the external engine and answers with a validated result.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use hcb_analyzer::config::{TomlConfig, MODULE_NAME};
use hcb_analyzer::services::{object_storage, ChunkStore, HttpFetcher, JobCoordinator};
use hcb_analyzer::{build_router, AppState};
use hcb_common::config::{
    default_config_path, ensure_directory, load_toml_config, resolve_root_folder, ROOT_FOLDER_ENV,
};

/// Upper bound for one remote download or storage request
const FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// How often abandoned upload sessions are swept
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Crates whose logs follow the configured level
const LOG_TARGETS: &[&str] = &["hcb_analyzer", "hcb_common"];

/// Command-line arguments for hcb-analyzer
#[derive(Parser, Debug)]
#[command(name = "hcb-analyzer")]
#[command(about = "Audio analysis microservice", long_about = None)]
#[command(version)]
struct Args {
    /// Root folder holding staging and artifacts
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "HCB_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long, env = "HCB_BIND")]
    bind: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long, env = "HCB_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config warnings must be visible before the configured subscriber exists
    let (config_path, config) = tracing::subscriber::with_default(
        hcb_common::logging::bootstrap_subscriber(LOG_TARGETS),
        || load_config(args.config.clone()),
    )?;

    hcb_common::logging::init_logging(&config.logging, LOG_TARGETS)?;

    info!("Starting {} (Audio Analysis) microservice", MODULE_NAME);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    let staging_dir = root_folder.join("staging");
    let artifacts_dir = root_folder.join("artifacts");
    ensure_directory(&staging_dir).context("Failed to initialize staging folder")?;
    ensure_directory(&artifacts_dir).context("Failed to initialize artifacts folder")?;
    info!("Root folder: {}", root_folder.display());

    let program = &config.engine.program;
    if !program.is_absolute() && config.engine.working_dir.is_none() {
        warn!(
            program = %program.display(),
            "Relative engine program without working_dir resolves against the current directory"
        );
    }

    let chunk_store = ChunkStore::new(&staging_dir, config.uploads.max_chunk_bytes);
    let fetcher = HttpFetcher::new(FETCH_TIMEOUT)?;
    let storage = object_storage::from_config(&config.storage, FETCH_TIMEOUT)?;
    if config.storage.url.is_none() {
        info!("Object storage not configured; /assets endpoints will fail");
    }

    let coordinator = JobCoordinator::new(
        chunk_store.clone(),
        &artifacts_dir,
        config.engine.clone(),
        Arc::new(fetcher),
        Arc::from(storage),
    );
    let state = AppState::new(coordinator).with_body_limit(config.uploads.max_body_bytes);
    let app = build_router(state);

    let max_age = Duration::from_secs(config.uploads.stale_session_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            chunk_store.purge_stale(max_age).await;
        }
    });

    let bind = args.bind.unwrap_or(config.server.bind);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// TOML file (explicit or default location) plus environment overrides
fn load_config(explicit: Option<PathBuf>) -> Result<(Option<PathBuf>, TomlConfig)> {
    let config_path = explicit.or_else(|| default_config_path(MODULE_NAME));
    let mut config: TomlConfig = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };
    config.apply_env_overrides();
    Ok((config_path, config))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
