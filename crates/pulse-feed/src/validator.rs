//! Inbound frame validation.
//!
//! Classifies raw WebSocket text into a tagged [`Frame`]. A frame that
//! carries market data is only accepted when every tick in it satisfies the
//! tick invariants (recognized symbol, finite numbers, known status, valid
//! timestamp); otherwise the whole frame becomes [`Frame::Invalid`] with the
//! first [`Rejection`] found.
//!
//! Wire format: JSON objects with a required `type` discriminator.
//! - `tick`: one tick under `data` (or inline when `data` is absent)
//! - `snapshot`: `data` is an object keyed by symbol or an array of ticks
//! - `heartbeat` / `ping` / `keepalive` / `pong`: liveness only
//! - `connected` / `welcome` / `status` / `subscribed` / `error`: control
//!
//! Unknown discriminators are rejected as `UnknownType` and dropped by the
//! caller; they never raise an error.

use chrono::{DateTime, TimeZone, Utc};
use pulse_core::{CoreError, MarketSnapshot, MarketTick, SymbolSet, TickStatus};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::error::FeedResult;

const HEARTBEAT_TYPES: [&str; 4] = ["heartbeat", "ping", "keepalive", "pong"];
const CONTROL_TYPES: [&str; 5] = ["connected", "welcome", "status", "subscribed", "error"];

/// Reason a frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed JSON")]
    MalformedJson,

    #[error("missing or non-string type discriminator")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("wrong type for field: {0}")]
    WrongType(&'static str),

    #[error("non-finite value for field: {0}")]
    NonFinite(&'static str),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("snapshot key does not match tick symbol: {0}")]
    SymbolMismatch(String),

    #[error("duplicate symbol in snapshot: {0}")]
    DuplicateSymbol(String),
}

impl Rejection {
    /// Stable label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::MalformedJson => "malformed_json",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::MissingField(_) => "missing_field",
            Self::WrongType(_) => "wrong_type",
            Self::NonFinite(_) => "non_finite",
            Self::UnknownSymbol(_) => "unknown_symbol",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::SymbolMismatch(_) => "symbol_mismatch",
            Self::DuplicateSymbol(_) => "duplicate_symbol",
        }
    }
}

/// Control frame payload (logged, never mutates state).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    pub control_type: String,
    pub payload: Value,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Tick(MarketTick),
    Snapshot(MarketSnapshot),
    Heartbeat,
    Control(ControlFrame),
    Invalid(Rejection),
}

/// Frame kind without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Tick,
    Snapshot,
    Heartbeat,
    Control,
    Invalid,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Snapshot => "snapshot",
            Self::Heartbeat => "heartbeat",
            Self::Control => "control",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Tick(_) => FrameKind::Tick,
            Self::Snapshot(_) => FrameKind::Snapshot,
            Self::Heartbeat => FrameKind::Heartbeat,
            Self::Control(_) => FrameKind::Control,
            Self::Invalid(_) => FrameKind::Invalid,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Classification counters.
#[derive(Debug, Default)]
pub struct ValidationStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    heartbeats: AtomicU64,
    control: AtomicU64,
}

impl ValidationStats {
    fn record(&self, kind: FrameKind) {
        let counter = match kind {
            FrameKind::Tick | FrameKind::Snapshot => &self.accepted,
            FrameKind::Heartbeat => &self.heartbeats,
            FrameKind::Control => &self.control,
            FrameKind::Invalid => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Tick and snapshot frames accepted.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn control(&self) -> u64 {
        self.control.load(Ordering::Relaxed)
    }
}

/// Frame validator bound to the recognized symbol set.
#[derive(Debug, Default)]
pub struct Validator {
    symbols: SymbolSet,
    stats: ValidationStats,
}

impl Validator {
    pub fn new(symbols: SymbolSet) -> Self {
        Self {
            symbols,
            stats: ValidationStats::default(),
        }
    }

    /// Build from raw symbol names.
    pub fn with_symbols<I, S>(names: I) -> FeedResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::new(SymbolSet::new(names)?))
    }

    pub fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    pub fn stats(&self) -> &ValidationStats {
        &self.stats
    }

    /// Classify a raw text frame.
    pub fn classify(&self, raw: &str) -> Frame {
        let frame = match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.classify_frame(&value),
            Err(_) => Frame::Invalid(Rejection::MalformedJson),
        };
        self.stats.record(frame.kind());
        frame
    }

    /// Classify an already-parsed frame.
    pub fn classify_value(&self, value: &Value) -> Frame {
        let frame = self.classify_frame(value);
        self.stats.record(frame.kind());
        frame
    }

    fn classify_frame(&self, value: &Value) -> Frame {
        let frame_type = match value.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None => return Frame::Invalid(Rejection::MissingType),
        };

        match frame_type {
            "tick" => {
                let payload = value.get("data").unwrap_or(value);
                match self.parse_tick(payload) {
                    Ok(tick) => Frame::Tick(tick),
                    Err(reason) => Frame::Invalid(reason),
                }
            }
            "snapshot" => match value.get("data") {
                Some(data) => match self.parse_snapshot(data) {
                    Ok(snapshot) => Frame::Snapshot(snapshot),
                    Err(reason) => Frame::Invalid(reason),
                },
                None => Frame::Invalid(Rejection::MissingField("data")),
            },
            t if HEARTBEAT_TYPES.contains(&t) => Frame::Heartbeat,
            t if CONTROL_TYPES.contains(&t) => Frame::Control(ControlFrame {
                control_type: t.to_string(),
                payload: value.get("data").cloned().unwrap_or(Value::Null),
            }),
            other => Frame::Invalid(Rejection::UnknownType(other.to_string())),
        }
    }

    /// Validate a single tick object.
    pub fn parse_tick(&self, value: &Value) -> Result<MarketTick, Rejection> {
        let obj = value.as_object().ok_or(Rejection::WrongType("tick"))?;

        let raw_symbol = match obj.get("symbol") {
            None => return Err(Rejection::MissingField("symbol")),
            Some(Value::String(s)) => s,
            Some(_) => return Err(Rejection::WrongType("symbol")),
        };
        let symbol = self
            .symbols
            .admit(raw_symbol)
            .map_err(|_| Rejection::UnknownSymbol(raw_symbol.clone()))?;

        let price = finite_field(obj, "price")?;
        let change = finite_field(obj, "change")?;
        let change_percent = finite_field(obj, "changePercent")?;

        let status = match obj.get("status") {
            None => return Err(Rejection::MissingField("status")),
            Some(Value::String(s)) => s
                .parse::<TickStatus>()
                .map_err(|_| Rejection::InvalidStatus(s.clone()))?,
            Some(other) => return Err(Rejection::InvalidStatus(other.to_string())),
        };

        let timestamp = match obj.get("timestamp") {
            None => return Err(Rejection::MissingField("timestamp")),
            Some(v) => parse_timestamp(v).ok_or(Rejection::InvalidTimestamp)?,
        };

        MarketTick::new(symbol, price, change, change_percent, status, timestamp).map_err(
            |e| match e {
                CoreError::NonFinite { field, .. } => Rejection::NonFinite(field),
                CoreError::InvalidSymbol(s) => Rejection::UnknownSymbol(s),
                CoreError::InvalidStatus(s) => Rejection::InvalidStatus(s),
            },
        )
    }

    /// Validate a full snapshot payload. One bad tick rejects the whole payload.
    pub fn parse_snapshot(&self, data: &Value) -> Result<MarketSnapshot, Rejection> {
        let mut snapshot = MarketSnapshot::new();

        match data {
            Value::Object(map) => {
                for (key, raw_tick) in map {
                    let tick = self.parse_tick(raw_tick)?;
                    if tick.symbol.as_str() != key.trim() {
                        return Err(Rejection::SymbolMismatch(key.clone()));
                    }
                    snapshot.insert(tick);
                }
            }
            Value::Array(items) => {
                let mut seen = BTreeSet::new();
                for raw_tick in items {
                    let tick = self.parse_tick(raw_tick)?;
                    if !seen.insert(tick.symbol.clone()) {
                        return Err(Rejection::DuplicateSymbol(tick.symbol.to_string()));
                    }
                    snapshot.insert(tick);
                }
            }
            _ => return Err(Rejection::WrongType("data")),
        }

        Ok(snapshot)
    }
}

fn finite_field(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<f64, Rejection> {
    match obj.get(field) {
        None => Err(Rejection::MissingField(field)),
        Some(Value::Number(n)) => {
            let v = n.as_f64().ok_or(Rejection::WrongType(field))?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(Rejection::NonFinite(field))
            }
        }
        Some(_) => Err(Rejection::WrongType(field)),
    }
}

/// Accepts epoch milliseconds or an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let ms = match n.as_i64() {
                Some(ms) => ms,
                None => {
                    let f = n.as_f64()?;
                    if !f.is_finite() || f.fract() != 0.0 {
                        return None;
                    }
                    f as i64
                }
            };
            Utc.timestamp_millis_opt(ms).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// True iff `0 <= now - timestamp <= max_age_ms`.
///
/// Future timestamps are never fresh: a negative age means the upstream
/// clock cannot be trusted.
pub fn is_fresh_data_at(timestamp: DateTime<Utc>, max_age_ms: u64, now: DateTime<Utc>) -> bool {
    let age_ms = (now - timestamp).num_milliseconds();
    age_ms >= 0 && (age_ms as u64) <= max_age_ms
}

/// [`is_fresh_data_at`] against the wall clock.
pub fn is_fresh_data(timestamp: DateTime<Utc>, max_age_ms: u64) -> bool {
    is_fresh_data_at(timestamp, max_age_ms, Utc::now())
}
