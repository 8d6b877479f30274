//! Last-known snapshot cache.
//!
//! Stores one record under [`CACHE_KEY`]:
//! `{"snapshot": {<symbol>: <tick>, ...}, "stored_at": "<RFC3339>"}`.
//! Expiry is checked at load time only; an expired record is left in place
//! and simply ignored.

use crate::error::PersistenceResult;
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use pulse_core::MarketSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Storage key of the snapshot record.
pub const CACHE_KEY: &str = "pulse.market-snapshot.v1";

/// Records older than this are ignored at load.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Persisted snapshot with its save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: MarketSnapshot,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Age at `now` in milliseconds.
    pub fn age_ms_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stored_at).num_milliseconds()
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLoad {
    Hit(CacheEntry),
    Missing,
    Expired { age_ms: i64 },
    /// Unreadable backend or corrupt record.
    Unusable,
}

impl CacheLoad {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Missing => "missing",
            Self::Expired { .. } => "expired",
            Self::Unusable => "unusable",
        }
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Stored form before the snapshot is checked.
#[derive(Deserialize)]
struct RawCacheEntry {
    snapshot: Value,
    stored_at: DateTime<Utc>,
}

/// Best-effort snapshot cache over a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
    expiry: Duration,
}

impl fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Persist `snapshot` stamped with the current time.
    ///
    /// Never fails: errors are logged and reported as `false`.
    pub fn save(&self, snapshot: &MarketSnapshot) -> bool {
        self.save_at(snapshot, Utc::now())
    }

    pub fn save_at(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        let entry = CacheEntry {
            snapshot: snapshot.clone(),
            stored_at: now,
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(?e, "Failed to serialize cache entry");
                return false;
            }
        };
        match self.store.set(CACHE_KEY, &json) {
            Ok(()) => {
                debug!(symbols = snapshot.len(), "Saved snapshot to cache");
                true
            }
            Err(e) => {
                warn!(?e, "Failed to write cache entry");
                false
            }
        }
    }

    /// Unexpired entry, if any.
    pub fn load(&self) -> Option<CacheEntry> {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.load_outcome_at(now).into_entry()
    }

    /// Read the record and classify it.
    pub fn load_outcome_at(&self, now: DateTime<Utc>) -> CacheLoad {
        self.load_checked_at(now, |raw| {
            serde_json::from_value::<MarketSnapshot>(raw.clone())
        })
    }

    /// Read the record, passing the raw snapshot through `check`.
    ///
    /// A record that `check` rejects is `Unusable`; one bad tick discards
    /// the whole entry.
    pub fn load_checked_at<F, E>(&self, now: DateTime<Utc>, check: F) -> CacheLoad
    where
        F: FnOnce(&Value) -> Result<MarketSnapshot, E>,
        E: fmt::Display,
    {
        let raw = match self.store.get(CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLoad::Missing,
            Err(e) => {
                warn!(?e, "Failed to read cache entry");
                return CacheLoad::Unusable;
            }
        };

        let record: RawCacheEntry = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(?e, "Ignoring corrupt cache entry");
                return CacheLoad::Unusable;
            }
        };

        let age_ms = (now - record.stored_at).num_milliseconds();
        if age_ms > self.expiry.as_millis() as i64 {
            debug!(age_ms, "Cache entry expired");
            return CacheLoad::Expired { age_ms };
        }

        match check(&record.snapshot) {
            Ok(snapshot) => CacheLoad::Hit(CacheEntry {
                snapshot,
                stored_at: record.stored_at,
            }),
            Err(e) => {
                warn!(error = %e, "Ignoring cache entry with invalid ticks");
                CacheLoad::Unusable
            }
        }
    }

    /// Remove the record.
    pub fn clear(&self) -> PersistenceResult<()> {
        self.store.remove(CACHE_KEY)
    }
}
