//! Tracing subscriber initialisation shared by HyperCuebe binaries

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` when set, otherwise the configured level
/// applied to the given crate targets plus `tower_http`.
pub fn build_filter(config: &LoggingConfig, targets: &[&str]) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = targets
            .iter()
            .map(|target| format!("{}={}", target, config.level))
            .collect::<Vec<_>>();
        directives.push(format!("tower_http={}", config.level));
        directives.push("warn".to_string());
        EnvFilter::new(directives.join(","))
    })
}

/// Install the global subscriber.
///
/// Logs go to stderr unless `config.file` is set, in which case they are
/// appended to that file without ANSI colours.
pub fn init_logging(config: &LoggingConfig, targets: &[&str]) -> Result<()> {
    let filter = build_filter(config, targets);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    Error::Config(format!("Open log file {} failed: {}", path.display(), e))
                })?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))
        }
        None => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}

/// Stderr subscriber at the default level, for use with
/// `tracing::subscriber::with_default` while the configuration that
/// `init_logging` needs is still being loaded
pub fn bootstrap_subscriber(targets: &[&str]) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(&LoggingConfig::default(), targets))
        .with_writer(std::io::stderr)
        .finish()
}
