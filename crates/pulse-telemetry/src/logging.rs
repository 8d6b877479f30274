//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,pulse=debug";

/// Initialize logging from the environment.
///
/// `RUST_LOG` overrides the default filter; `RUST_ENV=production` selects
/// JSON output, anything else the pretty formatter.
pub fn init_logging() -> TelemetryResult<()> {
    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);
    init_logging_with(None, is_production)
}

/// Initialize logging with an explicit filter and format.
///
/// Fails with [`TelemetryError::LoggingInit`] if a global subscriber is
/// already installed.
pub fn init_logging_with(filter: Option<&str>, json: bool) -> TelemetryResult<()> {
    let env_filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true).with_thread_names(true))
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
