//! Application error types.

use crate::endpoint::EndpointError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Feed error: {0}")]
    Feed(#[from] pulse_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pulse_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] pulse_persistence::PersistenceError),

    #[error("Health check failed: {0}")]
    Health(String),

    #[error("Client already started")]
    AlreadyStarted,
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
