//! Feed connection manager.
//!
//! Owns the market feed connection for one client session and is the only
//! writer of both the connection status and the market store.
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> Reconnecting -> Connecting -> ...
//!   any state --shutdown()--> Closed (terminal)
//! ```
//!
//! A single loop (`run`) owns the transport, so at most one connection
//! attempt is outstanding at any time. Once `Closed` has been published no
//! further transition is accepted.

use crate::error::{WsError, WsResult};
use crate::heartbeat::LivenessMonitor;
use crate::message::ClientFrame;
use crate::reconnect::BackoffPolicy;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_feed::{Frame, MarketStore, MarketStoreWriter, ValidationStats, Validator};
use pulse_persistence::LocalCache;
use pulse_telemetry::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Market feed URL (`{ws_base}/ws/market`).
    pub url: String,
    /// Expected server heartbeat interval; idle this long and we ping.
    pub heartbeat_interval: Duration,
    /// No inbound traffic for this long means the link is dead.
    pub liveness_timeout: Duration,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Minimum spacing between cache writes.
    pub cache_save_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval: Duration::from_secs(25),
            liveness_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            cache_save_interval: Duration::from_secs(1),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state plus a display descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub detail: String,
    /// Consecutive attempts since the last successful open.
    pub attempt: u32,
    pub since: DateTime<Utc>,
}

impl ConnectionStatus {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            detail: "not started".to_string(),
            attempt: 0,
            since: Utc::now(),
        }
    }
}

/// Lifecycle notifications, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionStatus),
    /// Handshake completed.
    Connected { attempt: u32 },
}

#[derive(Debug, Default)]
struct CacheSaveState {
    dirty: bool,
    last_save: Option<Instant>,
}

/// Feed connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    validator: Validator,
    writer: MarketStoreWriter,
    store: MarketStore,
    cache: Option<LocalCache>,
    liveness: LivenessMonitor,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    cache_state: Mutex<CacheSaveState>,
    seeded: AtomicBool,
    reconnect_notify: Notify,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        validator: Validator,
        writer: MarketStoreWriter,
        cache: Option<LocalCache>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::idle());
        let (events_tx, _) = broadcast::channel(64);
        let store = writer.reader();
        Self {
            liveness: LivenessMonitor::new(config.heartbeat_interval, config.liveness_timeout),
            config,
            validator,
            writer,
            store,
            cache,
            status_tx,
            events_tx,
            cache_state: Mutex::new(CacheSaveState::default()),
            seeded: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Reader handle on the market store this manager writes.
    pub fn store(&self) -> MarketStore {
        self.store.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Latest-value view of the status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Every transition, in order. Lagging receivers lose the oldest events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    pub fn validation_stats(&self) -> &ValidationStats {
        self.validator.stats()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Skip a pending backoff delay, or drop an open connection and
    /// reconnect immediately. No effect while a handshake is in flight.
    ///
    /// The request is held until the loop next waits, so one made while a
    /// frame is being handled is not lost.
    pub fn reconnect_now(&self) {
        info!(state = %self.state(), "Manual reconnect requested");
        self.reconnect_notify.notify_one();
    }

    /// Drop a pending manual reconnect request.
    fn clear_reconnect_request(&self) {
        let _ = self.reconnect_notify.notified().now_or_never();
    }

    /// Tear down the session.
    ///
    /// Cancels the backoff timer and the message loop, detaches the store
    /// writer, then flushes the cache. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
        self.writer.detach();
        self.flush_cache();
        self.transition(ConnectionState::Closed, "shut down", 0);
    }

    /// Seed the store from the local cache, once per session.
    ///
    /// Only fills symbols that have no live tick. An entry holding any tick
    /// the validator would reject is ignored whole. Returns the number of
    /// symbols filled.
    pub fn seed_from_cache(&self) -> usize {
        if self.seeded.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let Some(cache) = &self.cache else {
            return 0;
        };

        // Cached ticks pass the same checks as live frames.
        let outcome = cache.load_checked_at(Utc::now(), |raw| self.validator.parse_snapshot(raw));
        Metrics::cache_loaded(outcome.as_label());
        match outcome.into_entry() {
            Some(entry) => {
                let filled = self.writer.seed(entry.snapshot);
                if !filled.is_empty() {
                    Metrics::store_mutation("seed");
                }
                info!(
                    symbols = filled.len(),
                    stored_at = %entry.stored_at,
                    "Seeded market store from cache"
                );
                filled.len()
            }
            None => 0,
        }
    }

    /// Run the connection loop until [`shutdown`](Self::shutdown).
    ///
    /// Transport failures never escape; they only drive the state machine.
    pub async fn run(&self) -> WsResult<()> {
        self.seed_from_cache();

        let mut attempt = 0u32;
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                return Ok(());
            }

            attempt += 1;
            self.clear_reconnect_request();
            if !self.transition(
                ConnectionState::Connecting,
                format!("connecting to {}", self.config.url),
                attempt,
            ) {
                return Ok(());
            }

            let mut opened = false;
            let reason = match self.try_connect(attempt, &mut opened).await {
                Ok(()) => "manual",
                Err(e) => {
                    if opened {
                        warn!(error = %e, "Feed connection lost");
                    } else {
                        warn!(error = %e, attempt, "Feed connection attempt failed");
                    }
                    e.reconnect_reason()
                }
            };

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            if opened {
                attempt = 0;
            }
            Metrics::ws_reconnect(reason);

            let delay = if reason == "manual" {
                Duration::ZERO
            } else {
                self.config.backoff.delay_for(attempt.max(1))
            };
            if !self.transition(
                ConnectionState::Reconnecting,
                format!("{reason}, retrying in {}ms", delay.as_millis()),
                attempt,
            ) {
                return Ok(());
            }

            tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    return Ok(());
                }
                () = self.reconnect_notify.notified() => {
                    debug!("Backoff skipped");
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One session: handshake then the message loop.
    ///
    /// `Ok(())` means the session ended on request (shutdown or manual
    /// reconnect); `Err` is a transport or liveness failure.
    async fn try_connect(&self, attempt: u32, opened: &mut bool) -> WsResult<()> {
        info!(url = %self.config.url, attempt, "Connecting to market feed");

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_tls_with_config(&self.config.url, None, true, None),
        );
        let ws_stream = tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => return Ok(()),
            result = connect => match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => return Err(WsError::ConnectionFailed(e.to_string())),
                Err(_) => return Err(WsError::ConnectTimeout),
            },
        };
        let (mut write, mut read) = ws_stream.split();

        if !self.transition(ConnectionState::Open, "connected", 0) {
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }
        *opened = true;
        // A request made during the handshake does not drop the new session.
        self.clear_reconnect_request();
        let _ = self.events_tx.send(ConnectionEvent::Connected { attempt });
        self.liveness.reset();
        info!("Market feed connected");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                () = self.reconnect_notify.notified() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame before manual reconnect");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.liveness.record_message();
                            self.dispatch(&text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.liveness.record_message();
                            debug!(bytes = data.len(), "Ignoring binary frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.liveness.record_message();
                            trace!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.liveness.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1005, "no status".to_string()));
                            warn!(code, %reason, "Market feed closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!(?e, "Market feed read error");
                            return Err(e.into());
                        }
                        None => {
                            return Err(WsError::StreamEnded);
                        }
                    }
                }

                () = self.liveness.wait_for_check() => {
                    if self.liveness.is_timed_out() {
                        let idle_ms = self.liveness.idle().as_millis() as u64;
                        Metrics::liveness_timeout();
                        return Err(WsError::LivenessTimeout { idle_ms });
                    }
                    if self.liveness.should_send_heartbeat() {
                        let ping = ClientFrame::Ping.to_json()?;
                        write.send(Message::Text(ping)).await?;
                        self.liveness.record_ping();
                    }
                    self.save_cache_if_due();
                }
            }
        }
    }

    /// Route one text frame. Never fails: bad frames are counted and dropped.
    fn dispatch(&self, text: &str) {
        let frame = self.validator.classify(text);
        Metrics::frame_received(frame.kind().as_str());

        match frame {
            Frame::Tick(tick) => {
                let age_ms = tick.age_ms_at(Utc::now());
                if age_ms >= 0 {
                    Metrics::tick_age(age_ms as f64);
                }
                trace!(symbol = %tick.symbol, price = tick.price, "Tick");
                if self.writer.apply_tick(tick) {
                    Metrics::store_mutation("tick");
                    self.mark_dirty();
                }
            }
            Frame::Snapshot(snapshot) => {
                debug!(symbols = snapshot.len(), "Snapshot");
                if self.writer.replace_snapshot(snapshot) {
                    Metrics::store_mutation("snapshot");
                    self.mark_dirty();
                }
            }
            Frame::Heartbeat => trace!("Heartbeat"),
            Frame::Control(control) => {
                if control.control_type == "error" {
                    warn!(payload = %control.payload, "Server reported error");
                } else {
                    debug!(kind = %control.control_type, payload = %control.payload, "Control frame");
                }
            }
            Frame::Invalid(reason) => {
                Metrics::frame_rejected(reason.as_label());
                debug!(%reason, "Dropping invalid frame");
            }
        }
    }

    /// Publish a new status. Returns false once `Closed` has been published.
    fn transition(&self, state: ConnectionState, detail: impl Into<String>, attempt: u32) -> bool {
        let detail = detail.into();
        let events_tx = &self.events_tx;
        self.status_tx.send_if_modified(move |status| {
            if status.state == ConnectionState::Closed {
                return false;
            }
            let from = status.state;
            *status = ConnectionStatus {
                state,
                detail,
                attempt,
                since: Utc::now(),
            };
            Metrics::ws_state_set(state.as_str());
            debug!(%from, to = %state, detail = %status.detail, "Connection state changed");
            // Sent under the watch lock so event order matches status order.
            let _ = events_tx.send(ConnectionEvent::StateChanged(status.clone()));
            true
        })
    }

    fn mark_dirty(&self) {
        if self.cache.is_none() {
            return;
        }
        self.cache_state.lock().dirty = true;
        self.save_cache_if_due();
    }

    fn save_cache_if_due(&self) {
        let due = {
            let state = self.cache_state.lock();
            state.dirty
                && state
                    .last_save
                    .map_or(true, |at| at.elapsed() >= self.config.cache_save_interval)
        };
        if due {
            self.flush_cache();
        }
    }

    /// Write pending changes regardless of the save interval.
    fn flush_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        {
            let mut state = self.cache_state.lock();
            if !state.dirty {
                return;
            }
            state.dirty = false;
            state.last_save = Some(Instant::now());
        }
        let ok = cache.save(&self.store.get_all());
        Metrics::cache_saved(ok);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{MarketSnapshot, MarketTick, Symbol, SymbolSet, TickStatus};
    use pulse_feed::market_store;
    use pulse_persistence::{MemoryStore, DEFAULT_CACHE_EXPIRY};
    use serde_json::json;
    use std::sync::Arc;

    fn manager_with_cache(cache: Option<LocalCache>) -> ConnectionManager {
        let (writer, _store) = market_store();
        ConnectionManager::new(
            ConnectionConfig {
                url: "ws://127.0.0.1:9/ws/market".to_string(),
                ..Default::default()
            },
            Validator::new(SymbolSet::default()),
            writer,
            cache,
        )
    }

    fn memory_cache() -> LocalCache {
        LocalCache::new(Arc::new(MemoryStore::new()), DEFAULT_CACHE_EXPIRY)
    }

    fn tick(symbol: &str, price: f64) -> MarketTick {
        MarketTick::new(
            Symbol::new(symbol).unwrap(),
            price,
            0.0,
            0.0,
            TickStatus::Live,
            Utc::now(),
        )
        .unwrap()
    }

    fn nifty() -> Symbol {
        Symbol::new("NIFTY").unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.liveness_timeout, Duration::from_secs(60));
        assert_eq!(config.backoff.base_delay(1), Duration::from_secs(3));
    }

    #[test]
    fn test_starts_idle() {
        let manager = manager_with_cache(None);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.status().attempt, 0);
    }

    #[test]
    fn test_no_transition_after_closed() {
        let manager = manager_with_cache(None);
        let mut events = manager.subscribe_events();

        assert!(manager.transition(ConnectionState::Reconnecting, "test", 1));
        manager.shutdown();
        assert!(!manager.transition(ConnectionState::Connecting, "late timer", 2));
        assert!(!manager.transition(ConnectionState::Open, "late handshake", 0));
        assert_eq!(manager.state(), ConnectionState::Closed);

        let mut states = Vec::new();
        while let Ok(ConnectionEvent::StateChanged(s)) = events.try_recv() {
            states.push(s.state);
        }
        assert_eq!(
            states,
            vec![ConnectionState::Reconnecting, ConnectionState::Closed]
        );
    }

    #[test]
    fn test_dispatch_routes_frames() {
        let manager = manager_with_cache(None);
        let store = manager.store();

        let tick_frame = json!({
            "type": "tick",
            "data": {"symbol": "NIFTY", "price": 19550.0, "change": 50.0,
                     "changePercent": 0.26, "status": "LIVE", "timestamp": 1_705_311_000_000_i64}
        });
        manager.dispatch(&tick_frame.to_string());
        assert_eq!(store.get(&nifty()).map(|t| t.price), Some(19550.0));

        let before = store.get_all();
        manager.dispatch(r#"{"type":"heartbeat"}"#);
        manager.dispatch(r#"{"type":"heartbeat"}"#);
        manager.dispatch(r#"{"type":"welcome","data":{"v":1}}"#);
        manager.dispatch(r#"{"type":"tick","data":{"symbol":"NIFTY","price":"NaN"}}"#);
        manager.dispatch("garbage");
        assert_eq!(store.get_all(), before);

        let stats = manager.validation_stats();
        assert_eq!(stats.accepted(), 1);
        assert_eq!(stats.heartbeats(), 2);
        assert_eq!(stats.control(), 1);
        assert_eq!(stats.rejected(), 2);
    }

    #[test]
    fn test_seed_from_cache_once_and_never_over_live() {
        let cache = memory_cache();
        let cached: MarketSnapshot = vec![tick("NIFTY", 19500.0), tick("SENSEX", 65000.0)]
            .into_iter()
            .collect();
        assert!(cache.save(&cached));

        let manager = manager_with_cache(Some(cache));
        manager.writer.apply_tick(tick("NIFTY", 19550.0));

        assert_eq!(manager.seed_from_cache(), 1);
        assert_eq!(manager.seed_from_cache(), 0);

        let store = manager.store();
        assert_eq!(store.get(&nifty()).map(|t| t.price), Some(19550.0));
        assert_eq!(
            store.get(&Symbol::new("SENSEX").unwrap()).map(|t| t.price),
            Some(65000.0)
        );
    }

    #[test]
    fn test_seed_ignores_unrecognized_cached_symbol() {
        let cache = memory_cache();
        let cached: MarketSnapshot = vec![tick("DOWJONES", 1.0)].into_iter().collect();
        assert!(cache.save(&cached));

        let manager = manager_with_cache(Some(cache));
        assert_eq!(manager.seed_from_cache(), 0);
        assert!(manager.store().get(&Symbol::new("DOWJONES").unwrap()).is_none());
        assert!(manager.store().get_all().is_empty());
    }

    #[test]
    fn test_seed_rejects_entry_with_any_bad_tick() {
        let cache = memory_cache();
        let cached: MarketSnapshot = vec![tick("NIFTY", 19500.0), tick("DOWJONES", 1.0)]
            .into_iter()
            .collect();
        assert!(cache.save(&cached));

        let manager = manager_with_cache(Some(cache));
        assert_eq!(manager.seed_from_cache(), 0);
        assert!(manager.store().get(&nifty()).is_none());
    }

    #[test]
    fn test_shutdown_flushes_cache_and_detaches() {
        let cache = memory_cache();
        let manager = manager_with_cache(Some(cache.clone()));
        {
            // Pretend a save just happened so the next one is debounced.
            manager.cache_state.lock().last_save = Some(Instant::now());
        }
        manager.writer.apply_tick(tick("NIFTY", 1.0));
        manager.mark_dirty();
        assert!(cache.load().is_none());

        manager.shutdown();
        let entry = cache.load().unwrap();
        assert_eq!(entry.snapshot.get(&nifty()).map(|t| t.price), Some(1.0));

        manager.dispatch(
            &json!({"type": "tick", "data": {"symbol": "NIFTY", "price": 2.0, "change": 0.0,
                    "changePercent": 0.0, "status": "LIVE", "timestamp": 0}})
            .to_string(),
        );
        assert_eq!(manager.store().get(&nifty()).map(|t| t.price), Some(1.0));
    }

    #[tokio::test]
    async fn test_reconnect_request_kept_until_cleared() {
        let manager = manager_with_cache(None);

        // Nobody is waiting yet; the request must survive until the loop waits.
        manager.reconnect_now();
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            manager.reconnect_notify.notified(),
        )
        .await;
        assert!(waited.is_ok());

        manager.reconnect_now();
        manager.clear_reconnect_request();
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            manager.reconnect_notify.notified(),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_run_exits_after_shutdown() {
        let manager = Arc::new(manager_with_cache(None));
        manager.shutdown();
        tokio_test::assert_ok!(manager.run().await);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
