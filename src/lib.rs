//! Low-latency triangular arbitrage engine for a single spot exchange
//!
//! # Architecture
//! - **core**: interned symbols, seqlock order book, update bitmap
//! - **filters**: exchange lot/notional/tick rules and order sizing
//! - **strategy**: cycle enumeration, inverted index, two-stage evaluation
//! - **execution**: three-leg state machine with LIFO rollback
//! - **exchange**: quote-feed / order-entry / REST collaborators
//! - **persistence**: append-only trade audit log
//! - **infrastructure**: config, logging (cold path)

pub mod core;
pub mod exchange;
pub mod execution;
pub mod filters;
pub mod infrastructure;
pub mod persistence;
pub mod runner;
pub mod strategy;

// Re-export commonly used types
pub use infrastructure::config::{Config, PollingMode};
pub use runner::Runner;

use thiserror::Error;

/// Main error type for the engine
///
/// Configuration failures surface through
/// [`infrastructure::config::ConfigError`] before the engine exists, and
/// audit-log writes are best-effort (logged, never fatal), so neither
/// appears here.
#[derive(Error, Debug)]
pub enum ArbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("REST API error: {0}")]
    Rest(String),

    #[error("Symbol registry error: {0}")]
    Registry(#[from] core::registry::RegistryError),

    #[error("Execution failed at leg {leg}: {reason} (clOrdId={cl_ord_id})")]
    Execution {
        leg: usize,
        cl_ord_id: String,
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ArbError>;
