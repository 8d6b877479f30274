//! Prometheus metrics for pulse.
//!
//! Covers connection state, inbound frames, store mutations and the local
//! cache. All metrics register with the default registry on first use.
//!
//! # Panics
//!
//! Registration uses `unwrap()`: a failure means a duplicate metric name,
//! which is a programming error caught at first touch.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};

const WS_STATES: [&str; 5] = ["idle", "connecting", "open", "reconnecting", "closed"];

/// WebSocket connection state (1 = open, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("pulse_ws_connected", "WebSocket connection state (1=open)").unwrap()
});

/// Connection state machine current state.
/// Labels: state (idle/connecting/open/reconnecting/closed)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pulse_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_ws_reconnect_total",
        "Total reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

pub static LIVENESS_TIMEOUT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pulse_liveness_timeout_total",
        "Connections dropped for lack of inbound traffic"
    )
    .unwrap()
});

/// Inbound frames by classified kind.
pub static FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pulse_frames_total", "Inbound frames by kind", &["kind"]).unwrap()
});

pub static FRAMES_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_frames_rejected_total",
        "Rejected inbound frames by reason",
        &["reason"]
    )
    .unwrap()
});

/// Tick age at receipt, upstream timestamp to local clock.
pub static TICK_AGE_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "pulse_tick_age_ms",
        "Tick age at receipt in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

pub static STORE_MUTATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pulse_store_mutations_total",
        "Market store mutations by kind",
        &["kind"]
    )
    .unwrap()
});

pub static STORE_SUBSCRIBERS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("pulse_store_subscribers", "Registered store subscribers").unwrap()
});

/// Labels: result (ok/error)
pub static CACHE_SAVES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pulse_cache_saves_total", "Cache save attempts", &["result"]).unwrap()
});

/// Labels: outcome (hit/missing/expired/unusable)
pub static CACHE_LOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pulse_cache_loads_total", "Cache load attempts", &["outcome"]).unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active connection state; all other states go to 0.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "open" { 1.0 } else { 0.0 });
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn liveness_timeout() {
        LIVENESS_TIMEOUT_TOTAL.inc();
    }

    pub fn frame_received(kind: &str) {
        FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn frame_rejected(reason: &str) {
        FRAMES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn tick_age(age_ms: f64) {
        TICK_AGE_MS.observe(age_ms);
    }

    pub fn store_mutation(kind: &str) {
        STORE_MUTATIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn store_subscribers(count: usize) {
        STORE_SUBSCRIBERS.set(count as f64);
    }

    pub fn cache_saved(ok: bool) {
        let result = if ok { "ok" } else { "error" };
        CACHE_SAVES_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn cache_loaded(outcome: &str) {
        CACHE_LOADS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| crate::error::TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_is_exclusive() {
        Metrics::ws_state_set("open");
        assert_eq!(WS_STATE.with_label_values(&["open"]).get(), 1.0);
        assert_eq!(WS_CONNECTED.get(), 1.0);

        Metrics::ws_state_set("reconnecting");
        assert_eq!(WS_STATE.with_label_values(&["open"]).get(), 0.0);
        assert_eq!(WS_STATE.with_label_values(&["reconnecting"]).get(), 1.0);
        assert_eq!(WS_CONNECTED.get(), 0.0);
    }

    #[test]
    fn test_counters_and_gather() {
        let before = FRAMES_REJECTED_TOTAL
            .with_label_values(&["malformed_json"])
            .get();
        Metrics::frame_rejected("malformed_json");
        Metrics::cache_saved(true);
        Metrics::cache_loaded("hit");
        assert_eq!(
            FRAMES_REJECTED_TOTAL
                .with_label_values(&["malformed_json"])
                .get(),
            before + 1.0
        );

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("pulse_frames_rejected_total"));
        assert!(text.contains("pulse_cache_saves_total"));
    }
}
