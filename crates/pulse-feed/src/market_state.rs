//! Observable market data store.
//!
//! Holds the latest accepted tick per symbol. Writes go through a single
//! [`MarketStoreWriter`] owned by the connection task; any number of cloned
//! [`MarketStore`] readers may observe and subscribe.
//!
//! Subscribers are invoked synchronously after every successful mutation,
//! outside the data lock, so a callback may read the store.
//!
//! Each mutation, including its notifications, runs under a write gate that
//! [`MarketStoreWriter::detach`] also takes. Once `detach` returns, no write
//! is in flight and none will start.

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use pulse_core::{MarketSnapshot, MarketTick, Symbol};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::validator::is_fresh_data_at;

/// A store mutation, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// One symbol's tick replaced.
    Tick(MarketTick),
    /// Whole mapping replaced by a server snapshot.
    Snapshot(MarketSnapshot),
    /// Symbols filled from the local cache.
    Seeded(Vec<Symbol>),
}

type Callback = Arc<dyn Fn(&StoreUpdate) + Send + Sync>;

struct Inner {
    snapshot: RwLock<MarketSnapshot>,
    subscribers: RwLock<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
    detached: AtomicBool,
    /// Serializes mutations against `detach`. Reentrant so a callback may
    /// tear the session down.
    write_gate: ReentrantMutex<()>,
}

impl Inner {
    fn notify(&self, update: &StoreUpdate) {
        // Snapshot the list so callbacks can (un)subscribe without deadlocking.
        let subscribers: Vec<Callback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in subscribers {
            cb(update);
        }
    }
}

/// Create a connected writer/reader pair.
pub fn market_store() -> (MarketStoreWriter, MarketStore) {
    let inner = Arc::new(Inner {
        snapshot: RwLock::new(MarketSnapshot::new()),
        subscribers: RwLock::new(Vec::new()),
        next_id: AtomicU64::new(1),
        detached: AtomicBool::new(false),
        write_gate: ReentrantMutex::new(()),
    });
    (
        MarketStoreWriter {
            inner: Arc::clone(&inner),
        },
        MarketStore { inner },
    )
}

/// Read side of the store.
#[derive(Clone)]
pub struct MarketStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MarketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStore")
            .field("symbols", &self.inner.snapshot.read().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl MarketStore {
    /// Latest tick for `symbol`, if any.
    pub fn get(&self, symbol: &Symbol) -> Option<MarketTick> {
        self.inner.snapshot.read().get(symbol).cloned()
    }

    /// Copy of the full mapping.
    pub fn get_all(&self) -> MarketSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Register a change callback.
    ///
    /// The callback stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the handle does not remove it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreUpdate) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .push((id, Arc::new(callback)));
        trace!(id, "Store subscriber added");
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// True when `symbol` has no tick or its tick is older than `max_age_ms`.
    pub fn is_stale(&self, symbol: &Symbol, max_age_ms: u64) -> bool {
        self.is_stale_at(symbol, max_age_ms, Utc::now())
    }

    pub fn is_stale_at(&self, symbol: &Symbol, max_age_ms: u64, now: DateTime<Utc>) -> bool {
        match self.inner.snapshot.read().get(symbol) {
            Some(tick) => !is_fresh_data_at(tick.timestamp, max_age_ms, now),
            None => true,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }
}

/// Write side of the store. Not `Clone`: exactly one owner mutates.
pub struct MarketStoreWriter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MarketStoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStoreWriter")
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl MarketStoreWriter {
    /// Reader handle sharing this writer's state.
    pub fn reader(&self) -> MarketStore {
        MarketStore {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }

    /// Replace one symbol's tick. Other symbols are untouched.
    pub fn apply_tick(&self, tick: MarketTick) -> bool {
        let _gate = self.inner.write_gate.lock();
        if self.is_detached() {
            return false;
        }
        self.inner.snapshot.write().insert(tick.clone());
        self.inner.notify(&StoreUpdate::Tick(tick));
        true
    }

    /// Replace the whole mapping. An empty snapshot clears the store.
    pub fn replace_snapshot(&self, snapshot: MarketSnapshot) -> bool {
        let _gate = self.inner.write_gate.lock();
        if self.is_detached() {
            return false;
        }
        debug!(symbols = snapshot.len(), "Replacing market snapshot");
        *self.inner.snapshot.write() = snapshot.clone();
        self.inner.notify(&StoreUpdate::Snapshot(snapshot));
        true
    }

    /// Fill symbols that have no tick yet. Live data is never overwritten.
    ///
    /// Returns the symbols that were filled.
    pub fn seed(&self, cached: MarketSnapshot) -> Vec<Symbol> {
        let _gate = self.inner.write_gate.lock();
        if self.is_detached() {
            return Vec::new();
        }
        let filled: Vec<Symbol> = {
            let mut current = self.inner.snapshot.write();
            let mut filled = Vec::new();
            for tick in cached {
                if !current.contains(&tick.symbol) {
                    filled.push(tick.symbol.clone());
                    current.insert(tick);
                }
            }
            filled
        };
        if !filled.is_empty() {
            debug!(count = filled.len(), "Seeded store from cache");
            self.inner.notify(&StoreUpdate::Seeded(filled.clone()));
        }
        filled
    }

    /// Stop accepting writes. Data stays readable.
    ///
    /// Waits for an in-flight mutation, notifications included, to finish.
    pub fn detach(&self) {
        let _gate = self.inner.write_gate.lock();
        if !self.inner.detached.swap(true, Ordering::AcqRel) {
            debug!("Store writer detached");
        }
    }
}

/// Handle for one registered callback.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut subs = inner.subscribers.write();
        let before = subs.len();
        subs.retain(|(id, _)| *id != self.id);
        before != subs.len()
    }
}
