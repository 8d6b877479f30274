//! Application configuration.
//!
//! Layered with the `config` crate: serde defaults, then an optional TOML
//! file, then `PULSE__`-prefixed environment variables
//! (`PULSE__WEBSOCKET__LIVENESS_TIMEOUT_MS=30000`, `PULSE__SYMBOLS=NIFTY,SENSEX`).

use crate::endpoint::EndpointConfig;
use crate::error::{AppError, AppResult};
use config::{Config, Environment, File, FileFormat};
use pulse_core::{SymbolSet, DEFAULT_SYMBOLS};
use pulse_ws::{BackoffPolicy, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "PULSE_CONFIG";
const ENV_PREFIX: &str = "PULSE";
const ENV_SEPARATOR: &str = "__";

/// Backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: BackoffKind,
    /// Delay for the fixed strategy.
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// ±fraction of the delay; 0 disables jitter.
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::default(),
            delay_ms: default_reconnect_delay_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(c: &ReconnectConfig) -> Self {
        let policy = match c.strategy {
            BackoffKind::Fixed => BackoffPolicy::fixed(Duration::from_millis(c.delay_ms)),
            BackoffKind::Exponential => BackoffPolicy::exponential(
                Duration::from_millis(c.base_delay_ms),
                Duration::from_millis(c.max_delay_ms),
            ),
        };
        policy.with_jitter(c.jitter_factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_liveness_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Entries older than this are ignored at startup.
    #[serde(default = "default_cache_expiry_ms")]
    pub expiry_ms: u64,
    #[serde(default = "default_cache_save_interval_ms")]
    pub save_interval_ms: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_cache_expiry_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_cache_save_interval_ms() -> u64 {
    1_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
            expiry_ms: default_cache_expiry_ms(),
            save_interval_ms: default_cache_save_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Overrides `RUST_LOG` when set.
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Overrides the `RUST_ENV=production` switch when set.
    #[serde(default)]
    pub json_logs: Option<bool>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Recognized index symbols.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            endpoints: EndpointConfig::default(),
            websocket: WebSocketConfig::default(),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load defaults, an optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load) with an explicit environment map.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> AppResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config: Self = builder
            .add_source(env_source(env))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document (no environment layer).
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("symbols must not be empty".to_string()));
        }
        if self.websocket.heartbeat_interval_ms == 0 || self.websocket.liveness_timeout_ms == 0 {
            return Err(AppError::Config(
                "heartbeat interval and liveness timeout must be positive".to_string(),
            ));
        }
        let jitter = self.websocket.reconnect.jitter_factor;
        if !jitter.is_finite() || !(0.0..=1.0).contains(&jitter) {
            return Err(AppError::Config(format!(
                "websocket.reconnect.jitter_factor must be within [0, 1], got {jitter}"
            )));
        }
        if self.websocket.liveness_timeout_ms < self.websocket.heartbeat_interval_ms {
            tracing::warn!(
                heartbeat_interval_ms = self.websocket.heartbeat_interval_ms,
                liveness_timeout_ms = self.websocket.liveness_timeout_ms,
                "Liveness timeout is shorter than the heartbeat interval"
            );
        }
        Ok(())
    }

    pub fn symbol_set(&self) -> AppResult<SymbolSet> {
        SymbolSet::new(&self.symbols).map_err(|e| AppError::Feed(e.into()))
    }

    /// Connection settings for the given feed URL.
    pub fn connection_config(&self, url: String) -> ConnectionConfig {
        ConnectionConfig {
            url,
            heartbeat_interval: Duration::from_millis(self.websocket.heartbeat_interval_ms),
            liveness_timeout: Duration::from_millis(self.websocket.liveness_timeout_ms),
            connect_timeout: Duration::from_millis(self.websocket.connect_timeout_ms),
            backoff: BackoffPolicy::from(&self.websocket.reconnect),
            cache_save_interval: Duration::from_millis(self.cache.save_interval_ms),
        }
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_millis(self.cache.expiry_ms)
    }
}

fn env_source(env: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("symbols")
        .source(env)
}

/// Config path: CLI argument, then `PULSE_CONFIG`, else none.
pub fn config_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
}
