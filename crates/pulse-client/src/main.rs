//! pulse market data sync client - entry point.

use anyhow::Result;
use clap::Parser;
use pulse_client::config::config_path;
use pulse_client::{resolve_endpoints, AppConfig, Application, EnvironmentSignals, SignalSource};
use pulse_persistence::{FileStore, LocalCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Real-time market data sync client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PULSE_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host the client is served from; decides local vs production backend
    #[arg(long)]
    host: Option<String>,

    /// Check the backend health endpoint and exit
    #[arg(long)]
    check_health: bool,

    /// Remove the cached market snapshot and exit
    #[arg(long)]
    clear_cache: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    pulse_ws::init_crypto();

    let args = Args::parse();

    let path = config_path(args.config);
    let config = AppConfig::load(path.as_deref())?;

    match config.telemetry.log_filter.as_deref() {
        Some(filter) => pulse_telemetry::init_logging_with(
            Some(filter),
            config.telemetry.json_logs.unwrap_or(false),
        )?,
        None => pulse_telemetry::init_logging()?,
    }

    info!("Starting pulse client v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = ?path, "Configuration loaded");

    // --host wins over PULSE_HOST; URL overrides still come from the environment.
    let mut signals = EnvironmentSignals::from_env();
    if let Some(host) = args.host {
        signals.host = Some(host);
        signals.source = Some(SignalSource::RequestHost);
    }
    let endpoints = resolve_endpoints(&config.endpoints, &signals)?;
    endpoints.log_diagnostics();

    if args.clear_cache {
        if config.cache.enabled {
            let store = Arc::new(FileStore::new(&config.cache.dir));
            LocalCache::new(store, config.cache_expiry()).clear()?;
            info!(dir = %config.cache.dir.display(), "Cache cleared");
        } else {
            warn!("Cache disabled, nothing to clear");
        }
        return Ok(());
    }

    if args.check_health {
        let report = pulse_client::check_health(&endpoints.health_url()).await?;
        info!(
            status = report.status,
            latency_ms = report.latency_ms,
            healthy = report.is_healthy(),
            "Health check complete"
        );
        return Ok(());
    }

    Application::new(config, endpoints)
        .run(args.duration_secs.map(Duration::from_secs))
        .await?;

    Ok(())
}
