//! Durable audit trail

pub mod trade_log;

pub use trade_log::{LegKind, TradeLog, TradeRecord, TradeStatus};
