//! Order sizing against exchange filters
//!
//! Filters are indexed by [`SymbolId`] in a fixed array so the evaluator
//! rounds quantities with a single bounds-checked load, no hashing.

use crate::core::symbol::{SymbolId, MAX_SYMBOLS};
use crate::filters::SymbolFilters;

/// Validates and rounds order quantities to meet filter requirements
pub struct OrderSizer {
    by_id: Vec<Option<SymbolFilters>>,
    count: usize,
}

impl OrderSizer {
    pub fn new() -> Self {
        Self {
            by_id: vec![None; MAX_SYMBOLS],
            count: 0,
        }
    }

    /// Register filters for a symbol (init-phase only)
    pub fn add_symbol(&mut self, id: SymbolId, filters: SymbolFilters) {
        if !id.is_valid() {
            return;
        }
        if self.by_id[id.index()].is_none() {
            self.count += 1;
        }
        self.by_id[id.index()] = Some(filters);
    }

    #[inline]
    pub fn has_symbol(&self, id: SymbolId) -> bool {
        self.filters(id).is_some()
    }

    #[inline]
    pub fn filters(&self, id: SymbolId) -> Option<&SymbolFilters> {
        self.by_id.get(id.index()).and_then(Option::as_ref)
    }

    /// Round a quantity toward zero per the symbol's rules
    ///
    /// Unknown symbols pass the quantity through unrounded.
    #[inline]
    pub fn round_quantity(&self, id: SymbolId, qty: f64, is_market: bool) -> f64 {
        match self.filters(id) {
            Some(f) if is_market => f.round_market_qty(qty),
            Some(f) => f.round_qty(qty),
            None => qty,
        }
    }

    /// Notional check for an order; unknown symbols pass
    #[inline]
    pub fn validate_notional(&self, id: SymbolId, price: f64, qty: f64, is_market: bool) -> bool {
        match self.filters(id) {
            Some(f) => f.validate_notional(price, qty, is_market),
            None => true,
        }
    }

    /// Smallest valid quantity at `price` for the symbol
    pub fn min_quantity(&self, id: SymbolId, price: f64) -> f64 {
        self.filters(id)
            .map(|f| f.min_qty_for_notional(price))
            .unwrap_or(0.0)
    }

    pub fn symbol_count(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.by_id.iter_mut().for_each(|f| *f = None);
        self.count = 0;
    }
}

impl Default for OrderSizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{LotSizeFilter, NotionalFilter};

    fn filters_with_step(step: f64) -> SymbolFilters {
        let mut f = SymbolFilters::default();
        f.lot_size = LotSizeFilter {
            min_qty: 0.0,
            max_qty: 0.0,
            step_size: step,
        };
        f
    }

    #[test]
    fn test_round_known_symbol() {
        let mut sizer = OrderSizer::new();
        let id = SymbolId::from_raw(3);
        sizer.add_symbol(id, filters_with_step(0.01));

        assert!((sizer.round_quantity(id, 1.2345, true) - 1.23).abs() < 1e-12);
        assert!(sizer.has_symbol(id));
        assert_eq!(sizer.symbol_count(), 1);
    }

    #[test]
    fn test_unknown_symbol_passes_through() {
        let sizer = OrderSizer::new();
        let id = SymbolId::from_raw(9);
        assert!(!sizer.has_symbol(id));
        assert_eq!(sizer.round_quantity(id, 1.2345, true), 1.2345);
        assert!(sizer.validate_notional(id, 100.0, 0.0001, true));
    }

    #[test]
    fn test_market_lot_preference() {
        let mut sizer = OrderSizer::new();
        let id = SymbolId::from_raw(0);
        let mut f = filters_with_step(0.01);
        f.market_lot_size = LotSizeFilter {
            min_qty: 0.0,
            max_qty: 0.0,
            step_size: 0.5,
        };
        sizer.add_symbol(id, f);

        assert!((sizer.round_quantity(id, 1.9, true) - 1.5).abs() < 1e-12);
        assert!((sizer.round_quantity(id, 1.9, false) - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_notional_gate() {
        let mut sizer = OrderSizer::new();
        let id = SymbolId::from_raw(1);
        let mut f = SymbolFilters::default();
        f.notional = NotionalFilter {
            min: 10_000.0,
            max: 0.0,
            apply_min_to_market: true,
            apply_max_to_market: false,
        };
        sizer.add_symbol(id, f);

        assert!(!sizer.validate_notional(id, 0.06, 1.0, true));
        assert!(sizer.validate_notional(id, 0.06, 200_000.0, true));
    }

    #[test]
    fn test_invalid_id_ignored() {
        let mut sizer = OrderSizer::new();
        sizer.add_symbol(SymbolId::INVALID, SymbolFilters::default());
        assert_eq!(sizer.symbol_count(), 0);
        assert!(!sizer.has_symbol(SymbolId::INVALID));
    }
}
