//! Trading strategies
//!
//! A strategy exposes three capabilities to the orchestrator: route
//! discovery at startup, the set of symbols it needs subscribed, and a
//! per-update evaluation hook. New strategies are added as further
//! implementations of [`Strategy`].

pub mod path;
pub mod triangular;

pub use path::{CyclePath, CyclePool};
pub use triangular::{TriangularArbitrage, TriangularConfig};

use std::collections::HashMap;

use crate::core::{OrderBook, Signal, SymbolId, SymbolMeta, SymbolRegistry, UpdateBitmap};
use crate::filters::OrderSizer;

/// Capability set the orchestrator depends on
pub trait Strategy {
    /// Enumerate routes from the symbol catalog (init-time, once)
    fn discover_routes(&mut self, registry: &SymbolRegistry, symbols: &[SymbolMeta]);

    /// Symbols any route references; the orchestrator subscribes exactly these
    fn subscribed_symbols(&self) -> &[SymbolId];

    /// Evaluate affected routes for one batch of quote updates
    fn on_update(
        &mut self,
        updated: &UpdateBitmap,
        book: &OrderBook,
        stake: f64,
        sizer: &OrderSizer,
    ) -> Option<Signal>;
}

/// Per-symbol fee percentages with a default
///
/// Shared between evaluation (pre-computed multipliers) and execution
/// (traced-PnL reconstruction).
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    pub default_fee: f64,
    pub overrides: HashMap<String, f64>,
}

impl FeeSchedule {
    pub fn new(default_fee: f64, overrides: HashMap<String, f64>) -> Self {
        Self {
            default_fee,
            overrides,
        }
    }

    /// Fee percent for a symbol, e.g. 0.1 for 0.1%
    pub fn fee_pct(&self, symbol: &str) -> f64 {
        self.overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.default_fee)
    }

    /// Multiplier applied to a leg's proceeds: `1 - fee_pct / 100`
    pub fn fee_multiplier(&self, symbol: &str) -> f64 {
        1.0 - self.fee_pct(symbol) / 100.0
    }
}
