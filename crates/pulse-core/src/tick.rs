//! Tick and snapshot types.

use crate::error::{CoreError, CoreResult};
use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;

/// Upstream status of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TickStatus {
    Live,
    Offline,
}

impl TickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TickStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIVE" => Ok(Self::Live),
            "OFFLINE" => Ok(Self::Offline),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// One symbol's current quote.
///
/// All numeric fields are finite; `MarketTick::new` is the only
/// constructor and enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTick {
    pub symbol: Symbol,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub status: TickStatus,
    /// When the tick was produced upstream.
    pub timestamp: DateTime<Utc>,
}

impl MarketTick {
    /// Create a tick, rejecting non-finite numbers.
    pub fn new(
        symbol: Symbol,
        price: f64,
        change: f64,
        change_percent: f64,
        status: TickStatus,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<Self> {
        for (field, value) in [
            ("price", price),
            ("change", change),
            ("changePercent", change_percent),
        ] {
            if !value.is_finite() {
                return Err(CoreError::NonFinite { field, value });
            }
        }

        Ok(Self {
            symbol,
            price,
            change,
            change_percent,
            status,
            timestamp,
        })
    }

    /// Age relative to `now` in milliseconds (negative for future ticks).
    pub fn age_ms_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_milliseconds()
    }

    pub fn is_live(&self) -> bool {
        self.status == TickStatus::Live
    }
}

/// Latest tick per symbol.
///
/// May be partially populated when some symbols have never reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketSnapshot {
    ticks: BTreeMap<Symbol, MarketTick>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&MarketTick> {
        self.ticks.get(symbol)
    }

    /// Insert a tick, replacing any previous tick for its symbol.
    pub fn insert(&mut self, tick: MarketTick) -> Option<MarketTick> {
        self.ticks.insert(tick.symbol.clone(), tick)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.ticks.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, Symbol, MarketTick> {
        self.ticks.values()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.ticks.keys()
    }

    /// Newest upstream timestamp across all ticks.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ticks.values().map(|t| t.timestamp).max()
    }
}

impl FromIterator<MarketTick> for MarketSnapshot {
    fn from_iter<I: IntoIterator<Item = MarketTick>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for tick in iter {
            snapshot.insert(tick);
        }
        snapshot
    }
}

impl IntoIterator for MarketSnapshot {
    type Item = MarketTick;
    type IntoIter = btree_map::IntoValues<Symbol, MarketTick>;

    fn into_iter(self) -> Self::IntoIter {
        self.ticks.into_values()
    }
}
