//! Liveness monitoring for the feed connection.
//!
//! The server is expected to send something (data or heartbeat) at least
//! every heartbeat interval. Any inbound traffic counts. A link that stays
//! silent for the liveness timeout is considered dead even if the transport
//! never reported a close.
//!
//! Uses `tokio::time::Instant` so behavior follows a paused test clock.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Inbound-traffic watchdog.
pub struct LivenessMonitor {
    /// Expected heartbeat interval; also the idle period before we ping.
    interval: Duration,
    /// Silence longer than this is a dead connection.
    timeout: Duration,
    last_message: RwLock<Instant>,
    last_ping: RwLock<Option<Instant>>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_message: RwLock::new(Instant::now()),
            last_ping: RwLock::new(None),
        }
    }

    /// Reset state (called when a connection opens).
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_ping.write() = None;
    }

    /// Record any inbound frame.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
    }

    pub fn record_ping(&self) {
        let now = Instant::now();
        *self.last_ping.write() = Some(now);
        debug!(idle_ms = self.idle().as_millis() as u64, "Sent keepalive ping");
    }

    /// Time since the last inbound frame.
    pub fn idle(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.last_message.read())
    }

    pub fn is_timed_out(&self) -> bool {
        self.idle() >= self.timeout
    }

    /// Idle for a full interval and no ping sent within the last interval.
    pub fn should_send_heartbeat(&self) -> bool {
        if self.idle() < self.interval {
            return false;
        }
        match *self.last_ping.read() {
            Some(ping) => Instant::now().saturating_duration_since(ping) >= self.interval,
            None => true,
        }
    }

    /// Earliest instant at which a timeout or ping could become due.
    pub fn next_check(&self) -> Instant {
        let last_message = *self.last_message.read();
        let ping_base = match *self.last_ping.read() {
            Some(ping) if ping > last_message => ping,
            _ => last_message,
        };
        (last_message + self.timeout).min(ping_base + self.interval)
    }

    /// Sleep until the next check is due.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep_until(self.next_check()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(Duration::from_secs(25), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let m = monitor();
        assert!(!m.is_timed_out());
        assert!(!m.should_send_heartbeat());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_after_idle_interval() {
        let m = monitor();
        m.wait_for_check().await;
        assert_eq!(m.idle(), Duration::from_secs(25));
        assert!(m.should_send_heartbeat());
        assert!(!m.is_timed_out());

        m.record_ping();
        assert!(!m.should_send_heartbeat());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_silence() {
        let m = monitor();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!m.is_timed_out());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(m.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_resets_idle() {
        let m = monitor();
        tokio::time::advance(Duration::from_secs(50)).await;
        m.record_message();
        assert_eq!(m.idle(), Duration::ZERO);
        assert_eq!(m.next_check(), Instant::now() + Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_check_after_ping_is_timeout_or_next_ping() {
        let m = monitor();
        tokio::time::advance(Duration::from_secs(25)).await;
        m.record_ping();
        // Next ping at 50s, timeout at 60s.
        assert_eq!(m.next_check(), Instant::now() + Duration::from_secs(25));
        tokio::time::advance(Duration::from_secs(25)).await;
        m.record_ping();
        assert_eq!(m.next_check(), Instant::now() + Duration::from_secs(10));
    }
}
