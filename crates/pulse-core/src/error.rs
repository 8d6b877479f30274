//! Error types for pulse-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("Non-finite value for {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
