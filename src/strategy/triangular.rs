//! Triangular arbitrage strategy
//!
//! Route discovery enumerates every closed three-leg cycle returning to the
//! starting asset; the per-update hook reactivates only the cycles touched
//! by the update bitmap, screens them with the fast ratio, and fully
//! evaluates the survivors.

use std::collections::BTreeSet;

use crate::core::{Order, OrderBook, Side, Signal, SymbolId, SymbolMeta, SymbolRegistry, UpdateBitmap};
use crate::filters::OrderSizer;
use crate::strategy::path::{CyclePath, CyclePool};
use crate::strategy::{FeeSchedule, Strategy};

const CYCLE_DEPTH: usize = 3;

/// Strategy parameters
#[derive(Debug, Clone)]
pub struct TriangularConfig {
    /// Asset every cycle starts and ends in, e.g. "USDT"
    pub starting_asset: String,
    /// Fraction of the starting-asset balance staked per detection
    pub risk: f64,
    /// Fast-screen threshold; cycles at or below it are discarded
    pub min_profit_ratio: f64,
    /// Per-symbol fees with default
    pub fees: FeeSchedule,
}

impl Default for TriangularConfig {
    fn default() -> Self {
        Self {
            starting_asset: "USDT".to_string(),
            risk: 1.0,
            min_profit_ratio: 1.0001,
            fees: FeeSchedule::new(0.1, Default::default()),
        }
    }
}

pub struct TriangularArbitrage {
    config: TriangularConfig,
    pool: CyclePool,
    subscribed: Vec<SymbolId>,
}

impl TriangularArbitrage {
    pub fn new(config: TriangularConfig) -> Self {
        tracing::info!(
            starting_asset = %config.starting_asset,
            default_fee = config.fees.default_fee,
            risk = config.risk,
            min_profit_ratio = config.min_profit_ratio,
            "triangular arbitrage strategy created"
        );
        Self {
            config,
            pool: CyclePool::new(),
            subscribed: Vec::new(),
        }
    }

    pub fn starting_asset(&self) -> &str {
        &self.config.starting_asset
    }

    pub fn risk(&self) -> f64 {
        self.config.risk
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.config.fees
    }

    pub fn cycle_count(&self) -> usize {
        self.pool.len()
    }

    /// Orders that consume `asset`: a sell of every pair based in it, a buy
    /// of every pair quoted in it. `used` excludes already-traded symbols.
    fn possible_orders(asset: &str, symbols: &[SymbolMeta], used: &[usize]) -> Vec<(usize, Side)> {
        symbols
            .iter()
            .enumerate()
            .filter(|(idx, _)| !used.contains(idx))
            .filter_map(|(idx, meta)| {
                if meta.base == asset {
                    Some((idx, Side::Sell))
                } else if meta.quote == asset {
                    Some((idx, Side::Buy))
                } else {
                    None
                }
            })
            .collect()
    }

    fn resulting_asset(meta: &SymbolMeta, side: Side) -> &str {
        match side {
            Side::Buy => &meta.base,
            Side::Sell => &meta.quote,
        }
    }

    /// Breadth-first expansion to depth 3, closing back on the start asset
    fn compute_cycles(&self, symbols: &[SymbolMeta]) -> Vec<Vec<(usize, Side)>> {
        let start = self.config.starting_asset.as_str();

        let mut partials: Vec<Vec<(usize, Side)>> =
            Self::possible_orders(start, symbols, &[])
                .into_iter()
                .map(|leg| vec![leg])
                .collect();

        for depth in 1..CYCLE_DEPTH {
            let is_last = depth == CYCLE_DEPTH - 1;
            let mut extended = Vec::new();

            for partial in &partials {
                let &(last_idx, last_side) = partial.last().expect("non-empty partial");
                let asset = Self::resulting_asset(&symbols[last_idx], last_side);
                let used: Vec<usize> = partial.iter().map(|&(idx, _)| idx).collect();

                for (next_idx, next_side) in Self::possible_orders(asset, symbols, &used) {
                    if is_last
                        && Self::resulting_asset(&symbols[next_idx], next_side) != start
                    {
                        continue;
                    }
                    let mut next = partial.clone();
                    next.push((next_idx, next_side));
                    extended.push(next);
                }
            }

            partials = extended;
        }

        partials
    }
}

impl Strategy for TriangularArbitrage {
    fn discover_routes(&mut self, registry: &SymbolRegistry, symbols: &[SymbolMeta]) {
        tracing::info!(symbols = symbols.len(), "discovering arbitrage routes");

        let cycles = self.compute_cycles(symbols);

        self.pool = CyclePool::new();
        let mut subscribed = BTreeSet::new();

        for cycle in &cycles {
            let mut orders = [Order::new(SymbolId::INVALID, Side::Buy); 3];
            let mut fee_multipliers = [1.0f64; 3];
            let mut description = String::new();

            for (leg, &(meta_idx, side)) in cycle.iter().enumerate() {
                let meta = &symbols[meta_idx];
                let id = registry.get_id(&meta.name);
                debug_assert!(id.is_valid(), "catalog symbol not registered: {}", meta.name);

                orders[leg] = Order::new(id, side);
                fee_multipliers[leg] = self.config.fees.fee_multiplier(&meta.name);
                subscribed.insert(id);

                if leg > 0 {
                    description.push(' ');
                }
                description.push_str(side.as_str());
                description.push('@');
                description.push_str(&meta.name);
            }

            let path = CyclePath::new(orders, fee_multipliers, description);
            tracing::debug!(path = path.description(), "arbitrage path");
            self.pool.add_path(path);
        }

        self.pool.build_index();
        self.subscribed = subscribed.into_iter().collect();

        tracing::info!(
            paths = self.pool.len(),
            symbols = self.subscribed.len(),
            "route discovery complete"
        );
    }

    fn subscribed_symbols(&self) -> &[SymbolId] {
        &self.subscribed
    }

    fn on_update(
        &mut self,
        updated: &UpdateBitmap,
        book: &OrderBook,
        stake: f64,
        sizer: &OrderSizer,
    ) -> Option<Signal> {
        if stake <= 0.0 || self.pool.is_empty() {
            return None;
        }

        let affected = self.pool.affected(updated);
        if affected.is_empty() {
            return None;
        }

        let min_ratio = self.config.min_profit_ratio;
        let mut best: Option<Signal> = None;
        let mut best_pnl = 0.0;

        for idx in affected {
            let path = self.pool.get_mut(idx);
            path.update_prices(book);

            if path.fast_ratio() <= min_ratio {
                continue;
            }

            if let Some(signal) = path.evaluate(stake, sizer) {
                // Strictly greater wins; first evaluated kept on ties
                if signal.pnl > best_pnl {
                    best_pnl = signal.pnl;
                    best = Some(signal);
                }
            }
        }

        if let Some(ref signal) = best {
            tracing::info!(
                pnl = signal.pnl,
                path = %signal.description,
                "arbitrage opportunity detected"
            );
        }

        best
    }
}
