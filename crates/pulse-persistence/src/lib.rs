//! Local snapshot cache for pulse.
//!
//! Persists the last-known market snapshot so a restarted client can show
//! data before its first live tick. All cache operations are best-effort.

pub mod cache;
pub mod error;
pub mod store;

pub use cache::{CacheEntry, CacheLoad, LocalCache, CACHE_KEY, DEFAULT_CACHE_EXPIRY};
pub use error::{PersistenceError, PersistenceResult};
pub use store::{FileStore, KeyValueStore, MemoryStore};
