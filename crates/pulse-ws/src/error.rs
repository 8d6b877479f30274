//! WebSocket error types.
//!
//! Every variant except `Json` ends a session and sends the manager to
//! `Reconnecting`; none of them is surfaced past the connection status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out")]
    ConnectTimeout,

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Stream ended")]
    StreamEnded,

    #[error("Liveness timeout: no inbound traffic for {idle_ms}ms")]
    LivenessTimeout { idle_ms: u64 },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Reconnect reason label for metrics.
    pub fn reconnect_reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) | Self::ConnectTimeout => "connect_failed",
            Self::ConnectionClosed { .. } => "server_close",
            Self::StreamEnded => "stream_ended",
            Self::LivenessTimeout { .. } => "liveness_timeout",
            Self::Tungstenite(_) => "transport_error",
            Self::Json(_) => "encode_error",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
