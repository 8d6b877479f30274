//! Real-time market data sync client for pulse.
//!
//! Resolves backend endpoints, then keeps a live, validated market
//! snapshot in an observable store:
//! - seeded from the local cache at startup
//! - updated from the market feed WebSocket
//! - kept (stale but readable) across disconnects

pub mod app;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;

pub use app::{Application, SyncClient};
pub use config::AppConfig;
pub use endpoint::{
    resolve_endpoints, EndpointConfig, EndpointError, Endpoints, Environment, EnvironmentSignals,
    SignalSource,
};
pub use error::{AppError, AppResult};
pub use health::{check_health, HealthReport};
