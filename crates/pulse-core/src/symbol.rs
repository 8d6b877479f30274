//! Index symbol identity.
//!
//! The feed carries a small, fixed set of index symbols. The set is static
//! configuration, so `Symbol` is a validated string newtype rather than a
//! closed enum.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Symbols recognized when no explicit set is configured.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["NIFTY", "BANKNIFTY", "SENSEX"];

/// Index symbol (e.g., "NIFTY").
///
/// Immutable identity key of a tick. Ordering is lexical so snapshots
/// iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, trimming surrounding whitespace.
    ///
    /// Only rejects empty input; membership in the recognized set is
    /// checked by [`SymbolSet::admit`].
    pub fn new(raw: impl AsRef<str>) -> CoreResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidSymbol(raw.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The recognized symbol set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolSet(BTreeSet<Symbol>);

impl SymbolSet {
    /// Build a set from raw names. Empty names are rejected.
    pub fn new<I, S>(names: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = names
            .into_iter()
            .map(Symbol::new)
            .collect::<CoreResult<BTreeSet<_>>>()?;
        Ok(Self(symbols))
    }

    /// Check membership.
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.0.contains(symbol)
    }

    /// Admit a raw name as a recognized symbol.
    ///
    /// Matching is exact (case-sensitive) after trimming.
    pub fn admit(&self, raw: &str) -> CoreResult<Symbol> {
        let symbol = Symbol::new(raw)?;
        if self.contains(&symbol) {
            Ok(symbol)
        } else {
            Err(CoreError::InvalidSymbol(raw.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.0.iter()
    }
}

impl Default for SymbolSet {
    fn default() -> Self {
        Self(
            DEFAULT_SYMBOLS
                .iter()
                .map(|s| Symbol(s.to_string()))
                .collect(),
        )
    }
}
