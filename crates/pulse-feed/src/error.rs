//! Feed error types.

use crate::validator::Rejection;
use pulse_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Frame rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
