//! Core market data types for the pulse sync client.
//!
//! This crate provides the types shared by every other crate:
//! - `Symbol` / `SymbolSet`: index identity and the recognized set
//! - `MarketTick`: one symbol's current quote
//! - `MarketSnapshot`: latest tick per symbol

pub mod error;
pub mod symbol;
pub mod tick;

pub use error::{CoreError, CoreResult};
pub use symbol::{Symbol, SymbolSet, DEFAULT_SYMBOLS};
pub use tick::{MarketSnapshot, MarketTick, TickStatus};
