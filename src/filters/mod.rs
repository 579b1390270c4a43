//! Exchange trading rules: lot size, notional, price tick
//!
//! Parsed once from the exchange-info payload at startup, then frozen.
//! Quantity rounding is always toward zero (never up) so a rounded order
//! can never exceed an exchange-imposed ceiling.

pub mod sizer;

pub use sizer::OrderSizer;

use serde_json::Value;

/// Quantity rules (`LOT_SIZE` / `MARKET_LOT_SIZE`)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LotSizeFilter {
    pub min_qty: f64,
    pub max_qty: f64,
    pub step_size: f64,
}

impl LotSizeFilter {
    pub fn is_valid(&self) -> bool {
        self.step_size > 0.0 || self.min_qty > 0.0 || self.max_qty > 0.0
    }

    /// Floor to the step grid, then clamp into `[min_qty, max_qty]`
    pub fn round_qty(&self, qty: f64) -> f64 {
        let mut rounded = if self.step_size > 0.0 {
            (qty / self.step_size).floor() * self.step_size
        } else {
            qty
        };
        if self.min_qty > 0.0 {
            rounded = rounded.max(self.min_qty);
        }
        if self.max_qty > 0.0 {
            rounded = rounded.min(self.max_qty);
        }
        rounded
    }

    /// Smallest on-grid quantity at or above `qty`
    pub fn ceil_qty(&self, qty: f64) -> f64 {
        let mut rounded = if self.step_size > 0.0 {
            (qty / self.step_size).ceil() * self.step_size
        } else {
            qty
        };
        if self.min_qty > 0.0 {
            rounded = rounded.max(self.min_qty);
        }
        if self.max_qty > 0.0 {
            rounded = rounded.min(self.max_qty);
        }
        rounded
    }
}

/// Notional range (`NOTIONAL`)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NotionalFilter {
    pub min: f64,
    pub max: f64,
    pub apply_min_to_market: bool,
    pub apply_max_to_market: bool,
}

impl NotionalFilter {
    pub fn is_valid(&self) -> bool {
        self.min > 0.0 || self.max > 0.0
    }

    pub fn validate(&self, price: f64, qty: f64, is_market: bool) -> bool {
        let notional = price * qty;
        if self.min > 0.0 && (!is_market || self.apply_min_to_market) && notional < self.min {
            return false;
        }
        if self.max > 0.0 && (!is_market || self.apply_max_to_market) && notional > self.max {
            return false;
        }
        true
    }
}

/// Minimum notional (`MIN_NOTIONAL`, older payloads)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinNotionalFilter {
    pub min: f64,
    pub apply_to_market: bool,
}

impl MinNotionalFilter {
    pub fn is_valid(&self) -> bool {
        self.min > 0.0
    }

    pub fn validate(&self, price: f64, qty: f64, is_market: bool) -> bool {
        if !self.is_valid() || (is_market && !self.apply_to_market) {
            return true;
        }
        price * qty >= self.min
    }
}

/// Price rules (`PRICE_FILTER`)
///
/// Parsed for reference only. Market orders carry no price, so nothing in
/// the engine rounds or validates against these bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceFilter {
    pub min: f64,
    pub max: f64,
    pub tick_size: f64,
}

/// Per-symbol exchange rules
///
/// Only lot-size and notional rules gate market orders. `PRICE_FILTER` is
/// parsed but, like the other filter kinds in the payload (iceberg,
/// percent-price, order counts), does not apply to them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymbolFilters {
    pub lot_size: LotSizeFilter,
    pub market_lot_size: LotSizeFilter,
    pub notional: NotionalFilter,
    pub min_notional: MinNotionalFilter,
    pub price_filter: PriceFilter,
}

impl SymbolFilters {
    /// Parse from an exchange-info `filters` array
    ///
    /// Numeric fields arrive as strings or numbers depending on endpoint
    /// version; both are accepted.
    pub fn from_json(filters: &Value) -> Self {
        let mut out = SymbolFilters::default();

        let Some(list) = filters.as_array() else {
            return out;
        };

        for f in list {
            match f.get("filterType").and_then(Value::as_str) {
                Some("LOT_SIZE") => {
                    out.lot_size.min_qty = num_field(f, "minQty");
                    out.lot_size.max_qty = num_field(f, "maxQty");
                    out.lot_size.step_size = num_field(f, "stepSize");
                }
                Some("MARKET_LOT_SIZE") => {
                    out.market_lot_size.min_qty = num_field(f, "minQty");
                    out.market_lot_size.max_qty = num_field(f, "maxQty");
                    out.market_lot_size.step_size = num_field(f, "stepSize");
                }
                Some("NOTIONAL") => {
                    out.notional.min = num_field(f, "minNotional");
                    out.notional.max = num_field(f, "maxNotional");
                    out.notional.apply_min_to_market = bool_field(f, "applyMinToMarket");
                    out.notional.apply_max_to_market = bool_field(f, "applyMaxToMarket");
                }
                Some("MIN_NOTIONAL") => {
                    out.min_notional.min = num_field(f, "minNotional");
                    out.min_notional.apply_to_market = f
                        .get("applyToMarket")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                }
                Some("PRICE_FILTER") => {
                    out.price_filter.min = num_field(f, "minPrice");
                    out.price_filter.max = num_field(f, "maxPrice");
                    out.price_filter.tick_size = num_field(f, "tickSize");
                }
                _ => {}
            }
        }

        out
    }

    /// Round a limit-order quantity toward zero
    pub fn round_qty(&self, qty: f64) -> f64 {
        self.lot_size.round_qty(qty)
    }

    /// Round a market-order quantity, falling back to `LOT_SIZE` when no
    /// market-lot rule exists
    pub fn round_market_qty(&self, qty: f64) -> f64 {
        if self.market_lot_size.is_valid() {
            self.market_lot_size.round_qty(qty)
        } else {
            self.lot_size.round_qty(qty)
        }
    }

    /// Enforce NOTIONAL (preferred) or MIN_NOTIONAL with the market toggles
    pub fn validate_notional(&self, price: f64, qty: f64, is_market: bool) -> bool {
        if self.notional.is_valid() {
            self.notional.validate(price, qty, is_market)
        } else {
            self.min_notional.validate(price, qty, is_market)
        }
    }

    /// Smallest valid quantity at `price` meeting both lot and notional
    /// minimums, rounded up to the step grid
    pub fn min_qty_for_notional(&self, price: f64) -> f64 {
        let mut min_qty = self.lot_size.min_qty;
        if price > 0.0 {
            if self.min_notional.is_valid() {
                min_qty = min_qty.max(self.min_notional.min / price);
            }
            if self.notional.min > 0.0 {
                min_qty = min_qty.max(self.notional.min / price);
            }
        }
        self.lot_size.ceil_qty(min_qty)
    }
}

fn num_field(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lot(min: f64, max: f64, step: f64) -> LotSizeFilter {
        LotSizeFilter {
            min_qty: min,
            max_qty: max,
            step_size: step,
        }
    }

    #[test]
    fn test_round_qty_floors_to_step() {
        let f = lot(0.0, 0.0, 0.001);
        assert!((f.round_qty(1.23456) - 1.234).abs() < 1e-12);
        assert!((f.round_qty(0.0009) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_round_qty_no_step_passthrough() {
        let f = lot(0.0, 0.0, 0.0);
        assert_eq!(f.round_qty(1.23456789), 1.23456789);
    }

    #[test]
    fn test_round_qty_clamps() {
        let f = lot(0.1, 10.0, 0.1);
        assert!((f.round_qty(0.05) - 0.1).abs() < 1e-12);
        assert!((f.round_qty(99.0) - 10.0).abs() < 1e-12);
    }

    /// Rounding monotonicity: never up, and within one step of the input
    /// (in the regime above the lot minimum).
    #[test]
    fn test_round_qty_monotone_toward_zero() {
        let f = lot(0.0, 0.0, 0.01);
        for q in [0.0, 0.015, 0.5, 1.0, 3.14159, 250.007] {
            let r = f.round_qty(q);
            assert!(r <= q + 1e-12, "rounded up: {q} -> {r}");
            assert!(q - r < f.step_size + 1e-12, "lost more than a step: {q} -> {r}");
        }
    }

    #[test]
    fn test_market_qty_falls_back_to_lot_size() {
        let mut filters = SymbolFilters::default();
        filters.lot_size = lot(0.0, 0.0, 0.1);
        // No market_lot_size: falls back
        assert!((filters.round_market_qty(1.25) - 1.2).abs() < 1e-12);

        filters.market_lot_size = lot(0.0, 0.0, 0.5);
        assert!((filters.round_market_qty(1.25) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_notional_validation_market_toggles() {
        let mut filters = SymbolFilters::default();
        filters.notional = NotionalFilter {
            min: 10.0,
            max: 1000.0,
            apply_min_to_market: false,
            apply_max_to_market: true,
        };

        // Min not applied to market orders
        assert!(filters.validate_notional(1.0, 5.0, true));
        assert!(!filters.validate_notional(1.0, 5.0, false));

        // Max applied to market orders
        assert!(!filters.validate_notional(1.0, 5000.0, true));
        assert!(filters.validate_notional(1.0, 500.0, true));
    }

    #[test]
    fn test_min_notional_fallback() {
        let mut filters = SymbolFilters::default();
        filters.min_notional = MinNotionalFilter {
            min: 10.0,
            apply_to_market: true,
        };

        assert!(!filters.validate_notional(1.0, 5.0, true));
        assert!(filters.validate_notional(1.0, 15.0, true));
    }

    #[test]
    fn test_min_qty_for_notional_rounds_up() {
        let mut filters = SymbolFilters::default();
        filters.lot_size = lot(0.001, 0.0, 0.001);
        filters.notional.min = 10.0;

        // 10 / 3000 = 0.00333..; ceil to step = 0.004
        let q = filters.min_qty_for_notional(3000.0);
        assert!((q - 0.004).abs() < 1e-12);
        assert!(filters.validate_notional(3000.0, q, false));
    }

    #[test]
    fn test_from_json_string_and_number_fields() {
        let payload = json!([
            { "filterType": "PRICE_FILTER", "minPrice": "0.01000000", "maxPrice": "1000000.00000000", "tickSize": "0.01000000" },
            { "filterType": "LOT_SIZE", "minQty": "0.00010000", "maxQty": "9000.00000000", "stepSize": "0.00010000" },
            { "filterType": "MARKET_LOT_SIZE", "minQty": 0.0, "maxQty": 120.0, "stepSize": 0.0 },
            { "filterType": "NOTIONAL", "minNotional": "5.00000000", "applyMinToMarket": true, "maxNotional": "9000000.00000000", "applyMaxToMarket": false },
            { "filterType": "ICEBERG_PARTS", "limit": 10 }
        ]);

        let f = SymbolFilters::from_json(&payload);
        assert_eq!(f.price_filter.tick_size, 0.01);
        assert_eq!(f.lot_size.min_qty, 0.0001);
        assert_eq!(f.lot_size.max_qty, 9000.0);
        assert_eq!(f.market_lot_size.max_qty, 120.0);
        assert_eq!(f.notional.min, 5.0);
        assert!(f.notional.apply_min_to_market);
        assert!(!f.notional.apply_max_to_market);
    }

    #[test]
    fn test_from_json_empty() {
        let f = SymbolFilters::from_json(&json!([]));
        assert_eq!(f, SymbolFilters::default());
        // No rules: everything passes, nothing is rounded
        assert_eq!(f.round_market_qty(1.2345), 1.2345);
        assert!(f.validate_notional(1.0, 1.0, true));
    }
}
