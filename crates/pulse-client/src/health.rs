//! Backend health check.

use crate::error::{AppError, AppResult};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one check.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub url: String,
    pub status: u16,
    pub latency_ms: u64,
    /// Parsed body, when the server returned JSON.
    pub body: Option<serde_json::Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// GET `url` once and report status and latency.
pub async fn check_health(url: &str) -> AppResult<HealthReport> {
    let client = reqwest::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .build()
        .map_err(|e| AppError::Health(format!("Failed to create HTTP client: {e}")))?;

    let started = Instant::now();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Health(format!("Request to {url} failed: {e}")))?;
    let latency_ms = started.elapsed().as_millis() as u64;

    let status = response.status().as_u16();
    let body = response.json::<serde_json::Value>().await.ok();

    let report = HealthReport {
        url: url.to_string(),
        status,
        latency_ms,
        body,
    };
    if report.is_healthy() {
        info!(url, status, latency_ms, "Backend healthy");
    } else {
        warn!(url, status, latency_ms, "Backend unhealthy");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn test_healthy_json() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 15\r\nconnection: close\r\n\r\n{\"status\":\"ok\"}",
        )
        .await;
        let report = check_health(&url).await.unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.body.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn test_unhealthy_status() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let report = check_health(&url).await.unwrap();
        assert_eq!(report.status, 503);
        assert!(!report.is_healthy());
        assert!(report.body.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = check_health(&format!("http://{addr}/health")).await;
        assert!(matches!(result, Err(AppError::Health(_))));
    }
}
