//! Market data feed validation and state for pulse.
//!
//! Classifies inbound WebSocket frames into typed ticks/snapshots and keeps
//! the latest accepted tick per symbol in an observable, single-writer store.

pub mod error;
pub mod market_state;
pub mod validator;

pub use error::{FeedError, FeedResult};
pub use market_state::{market_store, MarketStore, MarketStoreWriter, StoreUpdate, Subscription};
pub use validator::{
    is_fresh_data, is_fresh_data_at, ControlFrame, Frame, FrameKind, Rejection, ValidationStats,
    Validator,
};
