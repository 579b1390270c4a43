//! Three-leg execution state machine
//!
//! Legs are submitted sequentially and fail fast: the first leg that does
//! not fill (or fills under tolerance) stops the sequence and every
//! already-filled leg is unwound in LIFO order with an opposite-side market
//! order. Every leg, rollback included, lands in the audit log.

use std::collections::HashMap;
use std::time::Duration;

use crate::core::{Side, Signal, SymbolRegistry};
use crate::exchange::{AdminApi, OrderEntry, OrderStatus};
use crate::persistence::{LegKind, TradeLog, TradeRecord, TradeStatus};
use crate::strategy::FeeSchedule;
use crate::{ArbError, Result};

pub const DEFAULT_FILL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Fills at or above this fraction of the requested quantity count as
/// complete (venues round market fills)
pub const DEFAULT_FILL_TOLERANCE: f64 = 0.99;

/// Observable state of the execution machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    Idle,
    Sending(u8),
    AwaitingFill(u8),
    Completed,
    RolledBack,
    Compromised,
}

/// Terminal result of one arbitrage sequence
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Completed {
        actual_pnl: f64,
        traced_pnl: f64,
        theoretical_pnl: f64,
    },
    /// A leg failed and every prior fill was unwound
    RolledBack,
    /// A leg failed and at least one unwind also failed; operator attention
    /// required before any new sequence
    Compromised,
}

/// A leg that reached the market, kept for reconciliation and rollback
#[derive(Debug, Clone)]
struct ExecutedLeg {
    leg_index: usize,
    cl_ord_id: String,
    symbol: String,
    side: Side,
    est_price: f64,
    est_qty: f64,
    fill_price: f64,
    fill_qty: f64,
    fee_rate: f64,
}

struct LegFailure {
    leg_index: usize,
    reason: String,
}

pub struct Executor<'a> {
    broker: &'a dyn OrderEntry,
    admin: &'a dyn AdminApi,
    log: &'a TradeLog,
    registry: &'a SymbolRegistry,
    fees: &'a FeeSchedule,
    live_mode: bool,
    fill_tolerance: f64,
    fill_timeout: Duration,
    rollback_timeout: Duration,
    phase: ExecPhase,
}

impl<'a> Executor<'a> {
    pub fn new(
        broker: &'a dyn OrderEntry,
        admin: &'a dyn AdminApi,
        log: &'a TradeLog,
        registry: &'a SymbolRegistry,
        fees: &'a FeeSchedule,
        live_mode: bool,
    ) -> Self {
        Self {
            broker,
            admin,
            log,
            registry,
            fees,
            live_mode,
            fill_tolerance: DEFAULT_FILL_TOLERANCE,
            fill_timeout: DEFAULT_FILL_TIMEOUT,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
            phase: ExecPhase::Idle,
        }
    }

    pub fn with_timeouts(mut self, fill: Duration, rollback: Duration) -> Self {
        self.fill_timeout = fill;
        self.rollback_timeout = rollback;
        self
    }

    pub fn with_fill_tolerance(mut self, tolerance: f64) -> Self {
        self.fill_tolerance = tolerance;
        self
    }

    pub fn phase(&self) -> ExecPhase {
        self.phase
    }

    /// Run the full sequence for one signal, reconciling `balances` against
    /// the exchange afterwards
    pub fn execute(
        &mut self,
        signal: &Signal,
        balances: &mut HashMap<String, f64>,
        starting_asset: &str,
    ) -> Result<ExecOutcome> {
        // Resolve all leg symbols up front; a signal can only reference
        // registered cycles
        let mut symbols: Vec<String> = Vec::with_capacity(3);
        for (leg, order) in signal.orders.iter().enumerate() {
            match self.registry.name(order.symbol_id) {
                Some(name) => symbols.push(name.to_string()),
                None => {
                    return Err(ArbError::Execution {
                        leg: leg + 1,
                        cl_ord_id: String::new(),
                        reason: "unregistered symbol in signal".to_string(),
                    })
                }
            }
        }

        let parent_id = self.log.next_parent_id();
        let balance_before = balances.get(starting_asset).copied().unwrap_or(0.0);

        let mode = if self.live_mode { "LIVE" } else { "TEST" };
        tracing::info!("========== EXECUTING ARBITRAGE ==========");
        tracing::info!(
            mode,
            path = %signal.description,
            theoretical_pnl = signal.pnl,
            parent_id = %parent_id,
            balance = balance_before,
            asset = starting_asset,
            "sequence start"
        );

        let mut executed: Vec<ExecutedLeg> = Vec::with_capacity(3);
        let mut failure: Option<LegFailure> = None;

        for (leg, order) in signal.orders.iter().enumerate() {
            let symbol = &symbols[leg];
            let fee_rate = self.fees.fee_pct(symbol) / 100.0;

            self.phase = ExecPhase::Sending(leg as u8 + 1);
            tracing::info!(
                leg = leg + 1,
                side = %order.side,
                symbol = %symbol,
                est_price = order.price,
                qty = order.qty,
                "submitting market order"
            );

            let cl_ord_id = match self.submit(symbol, order.side, order.qty, order.price) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(leg = leg + 1, error = %e, critical = true, "order submission failed");
                    self.audit_leg(
                        &parent_id,
                        "UNSENT",
                        leg,
                        symbol,
                        order.side,
                        order.price,
                        order.qty,
                        0.0,
                        0.0,
                        TradeStatus::Failed,
                    );
                    failure = Some(LegFailure {
                        leg_index: leg,
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            self.phase = ExecPhase::AwaitingFill(leg as u8 + 1);
            let status = self.broker.wait_for_completion(&cl_ord_id, self.fill_timeout);
            let state = self.broker.order_state(&cl_ord_id);

            match status {
                OrderStatus::Filled if state.filled_qty >= self.fill_tolerance * order.qty => {
                    let slippage = if order.price > 0.0 {
                        (state.avg_price - order.price) / order.price * 100.0
                    } else {
                        0.0
                    };
                    tracing::info!(
                        leg = leg + 1,
                        cl_ord_id = %cl_ord_id,
                        est_price = order.price,
                        real_price = state.avg_price,
                        slippage_pct = slippage,
                        est_qty = order.qty,
                        real_qty = state.filled_qty,
                        "leg filled"
                    );

                    executed.push(ExecutedLeg {
                        leg_index: leg,
                        cl_ord_id: cl_ord_id.clone(),
                        symbol: symbol.clone(),
                        side: order.side,
                        est_price: order.price,
                        est_qty: order.qty,
                        fill_price: state.avg_price,
                        fill_qty: state.filled_qty,
                        fee_rate,
                    });

                    // The exit leg is audited after PnL reconciliation
                    if leg < 2 {
                        self.audit_leg(
                            &parent_id,
                            &cl_ord_id,
                            leg,
                            symbol,
                            order.side,
                            order.price,
                            order.qty,
                            state.avg_price,
                            state.filled_qty,
                            TradeStatus::Executed,
                        );
                    }
                }
                OrderStatus::Filled => {
                    tracing::error!(
                        leg = leg + 1,
                        cl_ord_id = %cl_ord_id,
                        requested = order.qty,
                        filled = state.filled_qty,
                        critical = true,
                        "partial fill below tolerance"
                    );
                    // The partial position is real: keep it for rollback
                    if state.filled_qty > 0.0 {
                        executed.push(ExecutedLeg {
                            leg_index: leg,
                            cl_ord_id: cl_ord_id.clone(),
                            symbol: symbol.clone(),
                            side: order.side,
                            est_price: order.price,
                            est_qty: order.qty,
                            fill_price: state.avg_price,
                            fill_qty: state.filled_qty,
                            fee_rate,
                        });
                    }
                    self.audit_leg(
                        &parent_id,
                        &cl_ord_id,
                        leg,
                        symbol,
                        order.side,
                        order.price,
                        order.qty,
                        state.avg_price,
                        state.filled_qty,
                        TradeStatus::Partial,
                    );
                    failure = Some(LegFailure {
                        leg_index: leg,
                        reason: format!(
                            "partial fill: requested {:.8}, filled {:.8}",
                            order.qty, state.filled_qty
                        ),
                    });
                    break;
                }
                other => {
                    tracing::error!(
                        leg = leg + 1,
                        cl_ord_id = %cl_ord_id,
                        status = ?other,
                        reject_reason = %state.reject_reason,
                        critical = true,
                        "leg failed"
                    );
                    self.audit_leg(
                        &parent_id,
                        &cl_ord_id,
                        leg,
                        symbol,
                        order.side,
                        order.price,
                        order.qty,
                        0.0,
                        0.0,
                        TradeStatus::Failed,
                    );
                    failure = Some(LegFailure {
                        leg_index: leg,
                        reason: if state.reject_reason.is_empty() {
                            format!("{other:?}")
                        } else {
                            state.reject_reason.clone()
                        },
                    });
                    break;
                }
            }
        }

        if let Some(failure) = failure {
            tracing::error!(
                leg = failure.leg_index + 1,
                reason = %failure.reason,
                "sequence failed, unwinding {} executed leg(s)",
                executed.len()
            );
            let outcome = self.rollback(&executed, &parent_id);
            self.refresh_balances(balances);
            return Ok(outcome);
        }

        // All three legs filled: reconcile
        self.refresh_balances(balances);
        let balance_after = balances.get(starting_asset).copied().unwrap_or(0.0);
        let actual_pnl = balance_after - balance_before;

        let (initial_stake, traced_final) = trace_execution(&executed);
        let traced_pnl = traced_final - initial_stake;
        let traced_pct = if initial_stake > 0.0 {
            traced_pnl / initial_stake * 100.0
        } else {
            0.0
        };
        let actual_pct = if initial_stake > 0.0 {
            actual_pnl / initial_stake * 100.0
        } else {
            0.0
        };

        // Exit leg record carries the sequence PnL
        if let Some(exit) = executed.last() {
            self.log.record(&TradeRecord {
                trade_id: exit.cl_ord_id.clone(),
                parent_id: parent_id.clone(),
                leg_kind: LegKind::Exit,
                symbol: exit.symbol.clone(),
                side: exit.side.as_str().to_string(),
                intended_price: exit.est_price,
                intended_qty: exit.est_qty,
                actual_price: exit.fill_price,
                actual_qty: exit.fill_qty,
                status: TradeStatus::Executed,
                pnl: traced_pnl,
                pnl_pct: traced_pct,
                timestamp: chrono::Utc::now(),
            });
        }

        tracing::info!("========== EXECUTION SUMMARY ==========");
        tracing::info!(
            asset = starting_asset,
            balance_before,
            balance_after,
            actual_pnl,
            actual_pct,
            traced_pnl,
            traced_pct,
            theoretical_pnl = signal.pnl,
            "sequence complete"
        );

        self.phase = ExecPhase::Completed;
        Ok(ExecOutcome::Completed {
            actual_pnl,
            traced_pnl,
            theoretical_pnl: signal.pnl,
        })
    }

    fn submit(&self, symbol: &str, side: Side, qty: f64, est_price: f64) -> Result<String> {
        if self.live_mode {
            self.broker.send_market_order(symbol, side, qty, est_price)
        } else {
            self.broker.test_market_order(symbol, side, qty, est_price)
        }
    }

    /// Unwind executed legs latest-first with opposite-side market orders.
    /// At most one retry per leg; failures do not stop earlier legs.
    fn rollback(&mut self, executed: &[ExecutedLeg], parent_id: &str) -> ExecOutcome {
        // A first-leg failure leaves no position to unwind
        if executed.is_empty() {
            tracing::info!("no executed legs to unwind");
            self.phase = ExecPhase::RolledBack;
            return ExecOutcome::RolledBack;
        }

        let mut all_ok = true;

        for leg in executed.iter().rev() {
            let side = leg.side.opposite();
            let mut unwound = false;

            for attempt in 0..2 {
                tracing::warn!(
                    leg = leg.leg_index + 1,
                    side = %side,
                    symbol = %leg.symbol,
                    qty = leg.fill_qty,
                    attempt = attempt + 1,
                    "submitting rollback order"
                );

                // Price hint: the original fill price
                let cl_ord_id = match self.submit(&leg.symbol, side, leg.fill_qty, leg.fill_price)
                {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::error!(error = %e, "rollback submission failed");
                        continue;
                    }
                };

                let status = self.broker.wait_for_completion(&cl_ord_id, self.rollback_timeout);
                let state = self.broker.order_state(&cl_ord_id);

                if status == OrderStatus::Filled
                    && state.filled_qty >= self.fill_tolerance * leg.fill_qty
                {
                    if state.filled_qty < leg.fill_qty {
                        tracing::warn!(
                            cl_ord_id = %cl_ord_id,
                            requested = leg.fill_qty,
                            filled = state.filled_qty,
                            "rollback partially filled within tolerance"
                        );
                    }
                    self.audit_leg(
                        parent_id,
                        &cl_ord_id,
                        leg.leg_index,
                        &leg.symbol,
                        side,
                        leg.fill_price,
                        leg.fill_qty,
                        state.avg_price,
                        state.filled_qty,
                        TradeStatus::Rollback,
                    );
                    unwound = true;
                    break;
                }

                tracing::error!(
                    cl_ord_id = %cl_ord_id,
                    status = ?status,
                    filled = state.filled_qty,
                    "rollback order did not fill"
                );
            }

            if !unwound {
                all_ok = false;
                tracing::error!(
                    leg = leg.leg_index + 1,
                    symbol = %leg.symbol,
                    qty = leg.fill_qty,
                    critical = true,
                    "rollback failed, position left open"
                );
                self.audit_leg(
                    parent_id,
                    &leg.cl_ord_id,
                    leg.leg_index,
                    &leg.symbol,
                    side,
                    leg.fill_price,
                    leg.fill_qty,
                    0.0,
                    0.0,
                    TradeStatus::Failed,
                );
            }
        }

        if all_ok {
            tracing::warn!("sequence rolled back cleanly");
            self.phase = ExecPhase::RolledBack;
            ExecOutcome::RolledBack
        } else {
            tracing::error!(critical = true, "sequence compromised, operator attention required");
            self.phase = ExecPhase::Compromised;
            ExecOutcome::Compromised
        }
    }

    fn refresh_balances(&self, balances: &mut HashMap<String, f64>) {
        match self.admin.fetch_balances() {
            Ok(fresh) => *balances = fresh,
            Err(e) => tracing::error!(error = %e, "balance refresh failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_leg(
        &self,
        parent_id: &str,
        trade_id: &str,
        leg_index: usize,
        symbol: &str,
        side: Side,
        intended_price: f64,
        intended_qty: f64,
        actual_price: f64,
        actual_qty: f64,
        status: TradeStatus,
    ) {
        self.log.record(&TradeRecord {
            trade_id: trade_id.to_string(),
            parent_id: parent_id.to_string(),
            leg_kind: LegKind::from_index(leg_index),
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            intended_price,
            intended_qty,
            actual_price,
            actual_qty,
            status,
            pnl: 0.0,
            pnl_pct: 0.0,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Re-derive the sequence outcome from realized prices and quantities.
/// Returns (initial stake, final amount), both in the starting asset.
fn trace_execution(executed: &[ExecutedLeg]) -> (f64, f64) {
    let Some(first) = executed.first() else {
        return (0.0, 0.0);
    };

    // Recover the starting-asset amount that entered leg 1
    let initial = match first.side {
        Side::Buy => first.fill_qty * first.fill_price,
        Side::Sell => first.fill_qty,
    };

    let mut amount = initial;
    for leg in executed {
        amount = match leg.side {
            Side::Buy => (amount / leg.fill_price) * (1.0 - leg.fee_rate),
            Side::Sell => (amount * leg.fill_price) * (1.0 - leg.fee_rate),
        };
    }

    (initial, amount)
}
