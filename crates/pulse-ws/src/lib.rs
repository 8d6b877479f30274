//! Market feed WebSocket client for pulse.
//!
//! - Explicit connection state machine with unbounded reconnection
//! - Liveness timeout with keepalive pings
//! - Frame dispatch into the market store, cache seeding and write-back

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod reconnect;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use error::{WsError, WsResult};
pub use heartbeat::LivenessMonitor;
pub use message::ClientFrame;
pub use reconnect::{BackoffPolicy, BackoffStrategy};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call before the first `wss://` connect.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
