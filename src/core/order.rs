//! Order and signal types

use crate::core::symbol::{SymbolId, SymbolMeta};

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline(always)]
    pub const fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }

    /// The side that unwinds this one
    #[inline(always)]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

/// A single leg order
///
/// `qty` and `price` are working values mutated during evaluation; on a
/// emitted [`Signal`] they are final.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub symbol_id: SymbolId,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: f64,
}

impl Order {
    pub const fn new(symbol_id: SymbolId, side: Side) -> Self {
        Self {
            symbol_id,
            side,
            order_type: OrderType::Market,
            qty: 0.0,
            price: 0.0,
        }
    }

    /// Asset consumed by this order: quote for a buy, base for a sell
    pub fn starting_asset<'a>(&self, meta: &'a SymbolMeta) -> &'a str {
        match self.side {
            Side::Buy => &meta.quote,
            Side::Sell => &meta.base,
        }
    }

    /// Asset produced by this order: base for a buy, quote for a sell
    pub fn resulting_asset<'a>(&self, meta: &'a SymbolMeta) -> &'a str {
        match self.side {
            Side::Buy => &meta.base,
            Side::Sell => &meta.quote,
        }
    }
}

/// Executable three-leg proposal emitted by the evaluator
///
/// Emitted only when `pnl > 0` (strict).
#[derive(Debug, Clone)]
pub struct Signal {
    pub orders: [Order; 3],
    pub description: String,
    pub pnl: f64,
}
