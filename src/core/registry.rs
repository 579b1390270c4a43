//! Symbol registry (warm-path initialization)
//!
//! Interns symbol strings to dense [`SymbolId`]s. All registrations happen
//! single-threaded during startup; after that the registry is frozen and
//! lookups are plain `&self` reads with no synchronization.
//!
//! The registry is an owned instance handed out by the orchestrator; there
//! is no process-global singleton, every component that resolves names
//! receives a reference explicitly.

use std::collections::HashMap;

use crate::core::symbol::{SymbolId, MAX_SYMBOLS};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("symbol capacity exceeded ({MAX_SYMBOLS} max)")]
    CapacityExceeded,
}

/// Maps symbol strings to dense integer IDs for O(1) array lookups
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    ids: HashMap<String, SymbolId>,
    names: Vec<String>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            names: Vec::with_capacity(MAX_SYMBOLS),
        }
    }

    /// Register a symbol, returning its ID
    ///
    /// Idempotent: registering an already-known string returns the same ID.
    pub fn register(&mut self, symbol: &str) -> Result<SymbolId, RegistryError> {
        if let Some(&id) = self.ids.get(symbol) {
            return Ok(id);
        }

        if self.names.len() >= MAX_SYMBOLS {
            return Err(RegistryError::CapacityExceeded);
        }

        let id = SymbolId::from_raw(self.names.len() as u16);
        self.ids.insert(symbol.to_string(), id);
        self.names.push(symbol.to_string());
        Ok(id)
    }

    /// Register a batch of symbols, returning their IDs in order
    pub fn register_all<'a, I>(&mut self, symbols: I) -> Result<Vec<SymbolId>, RegistryError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        symbols.into_iter().map(|s| self.register(s)).collect()
    }

    /// Look up a symbol's ID, [`SymbolId::INVALID`] when unknown
    #[inline]
    pub fn get_id(&self, symbol: &str) -> SymbolId {
        self.ids.get(symbol).copied().unwrap_or(SymbolId::INVALID)
    }

    /// Get a symbol's name by ID
    #[inline]
    pub fn name(&self, id: SymbolId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.ids.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
