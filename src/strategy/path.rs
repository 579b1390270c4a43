//! Arbitrage cycle paths and the inverted cycle index
//!
//! A [`CyclePath`] is a frozen three-leg route plus a small mutable scratch
//! area for the prices read on the current evaluation pass. The
//! [`CyclePool`] owns all paths and an inverted `symbol -> cycle indices`
//! index so a quote update reactivates only the cycles that reference it.

use crate::core::{Order, OrderBook, OrderType, Signal, SymbolId, UpdateBitmap, MAX_SYMBOLS};
use crate::filters::OrderSizer;

/// One closed three-leg arbitrage route
#[derive(Debug, Clone)]
pub struct CyclePath {
    orders: [Order; 3],
    symbol_ids: [SymbolId; 3],
    is_buy: [bool; 3],
    /// Pre-computed `1 - fee_pct / 100` per leg
    fee_multipliers: [f64; 3],
    /// Cached human-readable route, e.g. "BUY@BTCUSDT BUY@ETHBTC SELL@ETHUSDT"
    description: String,

    // Scratch refreshed by update_prices()
    bids: [f64; 3],
    asks: [f64; 3],
    effective: [f64; 3],
    prices_valid: bool,
}

impl CyclePath {
    pub fn new(orders: [Order; 3], fee_multipliers: [f64; 3], description: String) -> Self {
        let symbol_ids = [
            orders[0].symbol_id,
            orders[1].symbol_id,
            orders[2].symbol_id,
        ];
        let is_buy = [
            orders[0].side.is_buy(),
            orders[1].side.is_buy(),
            orders[2].side.is_buy(),
        ];
        Self {
            orders,
            symbol_ids,
            is_buy,
            fee_multipliers,
            description,
            bids: [0.0; 3],
            asks: [0.0; 3],
            effective: [0.0; 3],
            prices_valid: false,
        }
    }

    #[inline]
    pub fn symbol_ids(&self) -> &[SymbolId; 3] {
        &self.symbol_ids
    }

    pub fn orders(&self) -> &[Order; 3] {
        &self.orders
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn contains_symbol(&self, id: SymbolId) -> bool {
        self.symbol_ids.contains(&id)
    }

    /// Refresh cached prices from the book and precompute per-leg
    /// effective multipliers (`1/ask` for buys, `bid` for sells)
    #[inline]
    pub fn update_prices(&mut self, book: &OrderBook) {
        let (q0, q1, q2) = book.get_triple(self.symbol_ids[0], self.symbol_ids[1], self.symbol_ids[2]);
        self.bids = [q0.bid, q1.bid, q2.bid];
        self.asks = [q0.ask, q1.ask, q2.ask];

        self.prices_valid = true;
        for leg in 0..3 {
            self.effective[leg] = if self.is_buy[leg] {
                if self.asks[leg] > 0.0 {
                    1.0 / self.asks[leg]
                } else {
                    self.prices_valid = false;
                    0.0
                }
            } else if self.bids[leg] > 0.0 {
                self.bids[leg]
            } else {
                self.prices_valid = false;
                0.0
            };
        }
    }

    /// Branch-light profitability screen
    ///
    /// Product of effective and fee multipliers across legs; a value above
    /// 1.0 means the cycle is potentially profitable before sizing. Returns
    /// 0.0 when any leg has no usable price.
    #[inline]
    pub fn fast_ratio(&self) -> f64 {
        if !self.prices_valid {
            return 0.0;
        }
        (self.effective[0] * self.fee_multipliers[0])
            * (self.effective[1] * self.fee_multipliers[1])
            * (self.effective[2] * self.fee_multipliers[2])
    }

    /// Full evaluation: walk the stake through all three legs applying
    /// lot rounding and notional validation, producing an executable
    /// order trio iff the final amount strictly exceeds the stake
    pub fn evaluate(&self, stake: f64, sizer: &OrderSizer) -> Option<Signal> {
        let mut current = stake;
        let mut prices = [0.0f64; 3];
        let mut qtys = [0.0f64; 3];

        for leg in 0..3 {
            let bid = self.bids[leg];
            let ask = self.asks[leg];
            if bid <= 0.0 || ask <= 0.0 {
                return None;
            }

            let id = self.symbol_ids[leg];
            let fee_mult = self.fee_multipliers[leg];

            if self.is_buy[leg] {
                // Give quote, get base: raw = current / ask, fee on proceeds
                let price = ask;
                let raw = current / price;
                let rounded = sizer.round_quantity(id, raw, true);
                if rounded <= 0.0 || !sizer.validate_notional(id, price, rounded, true) {
                    return None;
                }
                prices[leg] = price;
                qtys[leg] = raw;
                current = raw * fee_mult;
            } else {
                // Give base, get quote: sellable amount rounds to the lot grid
                let price = bid;
                let rounded = sizer.round_quantity(id, current, true);
                if rounded <= 0.0 || !sizer.validate_notional(id, price, rounded, true) {
                    return None;
                }
                prices[leg] = price;
                qtys[leg] = rounded;
                current = rounded * price * fee_mult;
            }
        }

        let pnl = current - stake;
        if pnl > 0.0 {
            let mut orders = self.orders;
            for leg in 0..3 {
                orders[leg].price = prices[leg];
                orders[leg].qty = qtys[leg];
                orders[leg].order_type = OrderType::Market;
            }
            Some(Signal {
                orders,
                description: self.description.clone(),
                pnl,
            })
        } else {
            None
        }
    }
}

/// Cycle storage with an inverted symbol index
pub struct CyclePool {
    paths: Vec<CyclePath>,
    index: Vec<Vec<usize>>,
    scratch: Vec<bool>,
}

impl CyclePool {
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            index: vec![Vec::new(); MAX_SYMBOLS],
            scratch: Vec::new(),
        }
    }

    pub fn add_path(&mut self, path: CyclePath) -> usize {
        let idx = self.paths.len();
        self.paths.push(path);
        idx
    }

    /// Rebuild the inverted index; call once after all paths are added
    pub fn build_index(&mut self) {
        for entry in &mut self.index {
            entry.clear();
        }
        for (idx, path) in self.paths.iter().enumerate() {
            for id in path.symbol_ids() {
                self.index[id.index()].push(idx);
            }
        }
        self.scratch = vec![false; self.paths.len()];
    }

    /// Cycle indices touching any updated symbol, deduplicated
    pub fn affected(&mut self, updated: &UpdateBitmap) -> Vec<usize> {
        let mut result = Vec::with_capacity(64);

        for sym_idx in updated.iter_ones() {
            for &path_idx in &self.index[sym_idx] {
                if !self.scratch[path_idx] {
                    self.scratch[path_idx] = true;
                    result.push(path_idx);
                }
            }
        }

        // Reset only the touched entries for the next call
        for &idx in &result {
            self.scratch[idx] = false;
        }

        result
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut CyclePath {
        &mut self.paths[idx]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CyclePath> {
        self.paths.iter()
    }
}

impl Default for CyclePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;

    fn make_path(ids: [u16; 3], sides: [Side; 3]) -> CyclePath {
        let orders = [
            Order::new(SymbolId::from_raw(ids[0]), sides[0]),
            Order::new(SymbolId::from_raw(ids[1]), sides[1]),
            Order::new(SymbolId::from_raw(ids[2]), sides[2]),
        ];
        CyclePath::new(orders, [0.999; 3], "test path".to_string())
    }

    fn triangle() -> CyclePath {
        // BUY BTCUSDT -> BUY ETHBTC -> SELL ETHUSDT
        make_path([0, 1, 2], [Side::Buy, Side::Buy, Side::Sell])
    }

    fn book_with(quotes: &[(u16, f64, f64)]) -> OrderBook {
        let book = OrderBook::new();
        for &(id, bid, ask) in quotes {
            book.update(SymbolId::from_raw(id), bid, ask);
        }
        book
    }

    #[test]
    fn test_fast_ratio_flat_market_below_one() {
        let book = book_with(&[
            (0, 50_000.0, 50_001.0),
            (1, 0.06, 0.0601),
            (2, 3000.0, 3001.0),
        ]);
        let mut path = triangle();
        path.update_prices(&book);

        let ratio = path.fast_ratio();
        assert!(ratio > 0.0);
        assert!(ratio < 1.0, "flat market should not screen as profitable: {ratio}");
    }

    #[test]
    fn test_fast_ratio_invalid_without_prices() {
        let book = book_with(&[(0, 50_000.0, 50_001.0), (2, 3000.0, 3001.0)]);
        let mut path = triangle();
        path.update_prices(&book); // ETHBTC never quoted
        assert_eq!(path.fast_ratio(), 0.0);
    }

    #[test]
    fn test_evaluate_profitable_cycle() {
        // Cheap ETH in BTC terms opens the cycle
        let book = book_with(&[
            (0, 50_000.0, 50_001.0),
            (1, 0.0579, 0.058),
            (2, 3000.0, 3001.0),
        ]);
        let mut path = triangle();
        path.update_prices(&book);
        assert!(path.fast_ratio() > 1.0001);

        let sizer = OrderSizer::new(); // no filters: step = 0 regime
        let signal = path.evaluate(100.0, &sizer).expect("profitable cycle");

        let expected =
            100.0 * (1.0 / 50_001.0) * (1.0 / 0.058) * 3000.0 * 0.999f64.powi(3) - 100.0;
        assert!((signal.pnl - expected).abs() < 1e-9);
        assert!(signal.pnl > 0.0);

        // Orders carry working prices and market type
        assert_eq!(signal.orders[0].price, 50_001.0);
        assert_eq!(signal.orders[1].price, 0.058);
        assert_eq!(signal.orders[2].price, 3000.0);
        for order in &signal.orders {
            assert_eq!(order.order_type, OrderType::Market);
            assert!(order.qty > 0.0);
        }
    }

    #[test]
    fn test_evaluate_rejects_on_missing_leg_price() {
        let book = book_with(&[(0, 50_000.0, 50_001.0), (2, 3000.0, 3001.0)]);
        let mut path = triangle();
        path.update_prices(&book);

        let sizer = OrderSizer::new();
        assert!(path.evaluate(100.0, &sizer).is_none());
    }

    /// Fast-screen soundness: ratio <= 1 implies full evaluation cannot be
    /// profitable at the same snapshot (no-filter regime, same fees).
    #[test]
    fn test_fast_screen_soundness() {
        let sizer = OrderSizer::new();
        let quotes = [
            (50_000.0, 50_001.0, 0.06, 0.0601, 3000.0, 3001.0),
            (50_000.0, 50_001.0, 0.0595, 0.0596, 3000.0, 3001.0),
            (40_000.0, 40_001.0, 0.07, 0.0701, 2900.0, 2901.0),
            (50_000.0, 50_001.0, 0.058, 0.0581, 2800.0, 2801.0),
        ];

        for (b0, a0, b1, a1, b2, a2) in quotes {
            let book = book_with(&[(0, b0, a0), (1, b1, a1), (2, b2, a2)]);
            let mut path = triangle();
            path.update_prices(&book);

            if path.fast_ratio() <= 1.0 {
                assert!(
                    path.evaluate(100.0, &sizer).is_none(),
                    "ratio <= 1 must not evaluate profitable at bids/asks ({b0},{a0},{b1},{a1},{b2},{a2})"
                );
            }
        }
    }

    #[test]
    fn test_pool_affected_dedup() {
        let mut pool = CyclePool::new();
        pool.add_path(make_path([0, 1, 2], [Side::Buy, Side::Buy, Side::Sell]));
        pool.add_path(make_path([2, 1, 0], [Side::Buy, Side::Sell, Side::Sell]));
        pool.add_path(make_path([3, 4, 5], [Side::Buy, Side::Buy, Side::Sell]));
        pool.build_index();

        let mut bits = UpdateBitmap::new();
        // Symbols 1 and 2 both appear in paths 0 and 1
        bits.set(SymbolId::from_raw(1));
        bits.set(SymbolId::from_raw(2));

        let affected = pool.affected(&bits);
        assert_eq!(affected, vec![0, 1]);

        // Scratch reset: a second pass gives the same answer
        let affected2 = pool.affected(&bits);
        assert_eq!(affected2, vec![0, 1]);
    }

    #[test]
    fn test_pool_affected_empty_bitmap() {
        let mut pool = CyclePool::new();
        pool.add_path(triangle());
        pool.build_index();

        let bits = UpdateBitmap::new();
        assert!(pool.affected(&bits).is_empty());
    }

    #[test]
    fn test_contains_symbol() {
        let path = triangle();
        assert!(path.contains_symbol(SymbolId::from_raw(1)));
        assert!(!path.contains_symbol(SymbolId::from_raw(9)));
    }
}

// Hot path checklist verified:
// ✓ fast_ratio() is branch-light: three multiplies over cached values
// ✓ update_prices() reads wait-free through the seqlock
// ✓ evaluate() allocates only when emitting a Signal
