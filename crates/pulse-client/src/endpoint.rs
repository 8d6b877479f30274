//! Backend endpoint resolution.
//!
//! Decides which API and WebSocket base URLs a client session uses.
//! Precedence:
//! 1. Explicit overrides (a missing WS override is derived from the API
//!    override by rewriting `http`/`https` to `ws`/`wss`).
//! 2. Hostname classification: local/private hosts use the local backend,
//!    the production domain (or a subdomain of it) uses production.
//! 3. Anything else, or no hostname at all, falls back to local.
//!
//! Resolution is pure; call [`Endpoints::log_diagnostics`] to log the result.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::info;

pub const ENV_API_URL: &str = "PULSE_API_URL";
pub const ENV_WS_URL: &str = "PULSE_WS_URL";
pub const ENV_HOST: &str = "PULSE_HOST";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("{which} endpoint is not configured: {value:?}")]
    Unconfigured { which: &'static str, value: String },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the hostname signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// A `Host` header; may carry a port or a bracketed IPv6 literal.
    RequestHost,
    /// A bare hostname as seen by the client.
    BrowserLocation,
}

/// Inputs to endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentSignals {
    pub api_url_override: Option<String>,
    pub ws_url_override: Option<String>,
    pub host: Option<String>,
    pub source: Option<SignalSource>,
}

impl EnvironmentSignals {
    pub fn from_request_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            source: Some(SignalSource::RequestHost),
            ..Default::default()
        }
    }

    pub fn from_location(hostname: impl Into<String>) -> Self {
        Self {
            host: Some(hostname.into()),
            source: Some(SignalSource::BrowserLocation),
            ..Default::default()
        }
    }

    /// Read `PULSE_API_URL`, `PULSE_WS_URL` and `PULSE_HOST`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let host = non_empty(ENV_HOST);
        Self {
            api_url_override: non_empty(ENV_API_URL),
            ws_url_override: non_empty(ENV_WS_URL),
            source: host.as_ref().map(|_| SignalSource::RequestHost),
            host,
        }
    }

    pub fn with_api_override(mut self, url: impl Into<String>) -> Self {
        self.api_url_override = Some(url.into());
        self
    }

    pub fn with_ws_override(mut self, url: impl Into<String>) -> Self {
        self.ws_url_override = Some(url.into());
        self
    }

    /// Lower-cased hostname with any port and IPv6 brackets removed.
    pub fn hostname(&self) -> Option<String> {
        let raw = self.host.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let host = match self.source {
            Some(SignalSource::RequestHost) => strip_port(raw),
            _ => raw.trim_start_matches('[').trim_end_matches(']'),
        };
        Some(host.trim_end_matches('.').to_ascii_lowercase())
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    // More than one colon is an unbracketed IPv6 literal, not host:port.
    match host.matches(':').count() {
        1 => host.split(':').next().unwrap_or(host),
        _ => host,
    }
}

/// Base URLs per environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_production_domain")]
    pub production_domain: String,
    #[serde(default = "default_production_api_url")]
    pub production_api_url: String,
    #[serde(default = "default_production_ws_url")]
    pub production_ws_url: String,
    #[serde(default = "default_local_api_url")]
    pub local_api_url: String,
    #[serde(default = "default_local_ws_url")]
    pub local_ws_url: String,
}

fn default_production_domain() -> String {
    "pulse.example.com".to_string()
}

fn default_production_api_url() -> String {
    "https://api.pulse.example.com".to_string()
}

fn default_production_ws_url() -> String {
    "wss://api.pulse.example.com".to_string()
}

fn default_local_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_local_ws_url() -> String {
    "ws://localhost:8000".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            production_domain: default_production_domain(),
            production_api_url: default_production_api_url(),
            production_ws_url: default_production_ws_url(),
            local_api_url: default_local_api_url(),
            local_ws_url: default_local_ws_url(),
        }
    }
}

/// Resolved base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub environment: Environment,
}

impl Endpoints {
    /// `{ws_base}/ws/market`
    pub fn market_feed_url(&self) -> String {
        format!("{}/ws/market", self.ws_base_url)
    }

    /// `{api_base}/health`
    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_base_url)
    }

    /// Emit one structured event describing the resolution.
    pub fn log_diagnostics(&self) {
        info!(
            environment = %self.environment,
            api_base_url = %self.api_base_url,
            ws_base_url = %self.ws_base_url,
            market_feed_url = %self.market_feed_url(),
            "Resolved backend endpoints"
        );
    }
}

/// Classify a hostname.
pub fn classify_host(hostname: &str, production_domain: &str) -> Environment {
    if is_local_host(hostname) {
        return Environment::Local;
    }
    let domain = production_domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if !domain.is_empty()
        && (hostname == domain || hostname.ends_with(&format!(".{domain}")))
    {
        return Environment::Production;
    }
    Environment::Local
}

fn is_local_host(hostname: &str) -> bool {
    if matches!(hostname, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
        || hostname.ends_with(".local")
        || hostname.starts_with("10.")
        || hostname.starts_with("192.168.")
    {
        return true;
    }
    hostname
        .strip_prefix("172.")
        .and_then(|rest| rest.split('.').next())
        .and_then(|octet| octet.parse::<u8>().ok())
        .is_some_and(|octet| (16..=31).contains(&octet))
}

/// Resolve API and WebSocket base URLs.
pub fn resolve_endpoints(
    config: &EndpointConfig,
    signals: &EnvironmentSignals,
) -> Result<Endpoints, EndpointError> {
    let environment = match signals.hostname() {
        Some(host) => classify_host(&host, &config.production_domain),
        None => Environment::Local,
    };

    let (default_api, default_ws) = match environment {
        Environment::Production => (&config.production_api_url, &config.production_ws_url),
        Environment::Local => (&config.local_api_url, &config.local_ws_url),
    };

    let api_override = signals.api_url_override.as_deref().map(str::trim);
    let api = api_override.unwrap_or(default_api.as_str());

    let ws = match (signals.ws_url_override.as_deref().map(str::trim), api_override) {
        (Some(ws), _) => ws.to_string(),
        (None, Some(api)) => derive_ws_url(api),
        (None, None) => default_ws.clone(),
    };

    Ok(Endpoints {
        api_base_url: validate_url("api", api, &["http://", "https://"])?,
        ws_base_url: validate_url("ws", &ws, &["ws://", "wss://"])?,
        environment,
    })
}

/// `http(s)://` to `ws(s)://`. Other schemes are returned unchanged.
fn derive_ws_url(api: &str) -> String {
    if let Some(rest) = api.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api.to_string()
    }
}

fn validate_url(which: &'static str, raw: &str, schemes: &[&str]) -> Result<String, EndpointError> {
    let url = raw.trim().trim_end_matches('/');
    let has_host = schemes
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
        .is_some_and(|rest| !rest.is_empty());
    if !has_host {
        return Err(EndpointError::Unconfigured {
            which,
            value: raw.to_string(),
        });
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> EndpointConfig {
        EndpointConfig::default()
    }

    #[test]
    fn test_local_hosts() {
        for host in [
            "localhost",
            "127.0.0.1",
            "0.0.0.0",
            "10.1.2.3",
            "192.168.0.10",
            "172.16.0.1",
            "172.31.255.255",
            "devbox.local",
        ] {
            let endpoints =
                resolve_endpoints(&config(), &EnvironmentSignals::from_location(host)).unwrap();
            assert_eq!(endpoints.environment, Environment::Local, "{host}");
            assert_eq!(endpoints.api_base_url, "http://localhost:8000");
        }
    }

    #[test]
    fn test_non_private_172_is_not_local_but_falls_back() {
        assert!(!is_local_host("172.32.0.1"));
        assert!(!is_local_host("172.15.0.1"));
        assert_eq!(classify_host("172.32.0.1", "pulse.example.com"), Environment::Local);
    }

    #[test]
    fn test_production_domain_and_subdomain() {
        for host in ["pulse.example.com", "app.pulse.example.com", "PULSE.EXAMPLE.COM"] {
            let endpoints =
                resolve_endpoints(&config(), &EnvironmentSignals::from_location(host)).unwrap();
            assert_eq!(endpoints.environment, Environment::Production, "{host}");
            assert_eq!(endpoints.ws_base_url, "wss://api.pulse.example.com");
        }
        assert_eq!(
            classify_host("notpulse.example.com", "pulse.example.com"),
            Environment::Local
        );
    }

    #[test]
    fn test_request_host_strips_port() {
        let signals = EnvironmentSignals::from_request_host("app.pulse.example.com:443");
        assert_eq!(signals.hostname().as_deref(), Some("app.pulse.example.com"));
        assert_eq!(
            EnvironmentSignals::from_request_host("[::1]:3000").hostname().as_deref(),
            Some("::1")
        );
        assert_eq!(
            EnvironmentSignals::from_request_host("::1").hostname().as_deref(),
            Some("::1")
        );
        let endpoints = resolve_endpoints(&config(), &signals).unwrap();
        assert_eq!(endpoints.environment, Environment::Production);
    }

    #[test]
    fn test_no_signal_is_local() {
        let endpoints = resolve_endpoints(&config(), &EnvironmentSignals::default()).unwrap();
        assert_eq!(endpoints.environment, Environment::Local);
        assert_eq!(endpoints.market_feed_url(), "ws://localhost:8000/ws/market");
        assert_eq!(endpoints.health_url(), "http://localhost:8000/health");
    }

    #[test]
    fn test_api_override_derives_ws() {
        let signals = EnvironmentSignals::from_location("app.pulse.example.com")
            .with_api_override("https://staging.internal/");
        let endpoints = resolve_endpoints(&config(), &signals).unwrap();
        assert_eq!(endpoints.api_base_url, "https://staging.internal");
        assert_eq!(endpoints.ws_base_url, "wss://staging.internal");

        let plain = EnvironmentSignals::default().with_api_override("http://10.0.0.5:9000");
        let endpoints = resolve_endpoints(&config(), &plain).unwrap();
        assert_eq!(endpoints.ws_base_url, "ws://10.0.0.5:9000");
    }

    #[test]
    fn test_explicit_ws_override_wins() {
        let signals = EnvironmentSignals::default()
            .with_api_override("https://a.example")
            .with_ws_override("wss://stream.example");
        let endpoints = resolve_endpoints(&config(), &signals).unwrap();
        assert_eq!(endpoints.ws_base_url, "wss://stream.example");
    }

    #[test]
    fn test_unconfigured_is_error() {
        let signals = EnvironmentSignals::default().with_api_override("api.example.com");
        assert!(matches!(
            resolve_endpoints(&config(), &signals),
            Err(EndpointError::Unconfigured { which: "api", .. })
        ));

        let mut empty = config();
        empty.local_ws_url = "  ".to_string();
        assert!(matches!(
            resolve_endpoints(&empty, &EnvironmentSignals::default()),
            Err(EndpointError::Unconfigured { which: "ws", .. })
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_URL, "https://override.example"),
            (ENV_HOST, "app.pulse.example.com:8443"),
            (ENV_WS_URL, ""),
        ]
        .into_iter()
        .collect();
        let signals = EnvironmentSignals::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(signals.ws_url_override, None);
        assert_eq!(signals.source, Some(SignalSource::RequestHost));

        let endpoints = resolve_endpoints(&config(), &signals).unwrap();
        assert_eq!(endpoints.environment, Environment::Production);
        assert_eq!(endpoints.ws_base_url, "wss://override.example");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let signals = EnvironmentSignals::from_request_host("localhost:3000");
        assert_eq!(
            resolve_endpoints(&config(), &signals),
            resolve_endpoints(&config(), &signals)
        );
    }
}
