//! Orchestrator: lifecycle and main loop
//!
//! Wires the registry, order book, strategy, executor and collaborators
//! together. Initialization follows a strict order: catalog, routes,
//! balances, connections, subscriptions, snapshot barrier. After that the
//! main loop waits for quote updates and hands detections to the executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{OrderBook, SymbolRegistry, UpdateBitmap};
use crate::exchange::{Admin, AdminApi, Broker, QuoteFeed, WsFeeder};
use crate::execution::{ExecOutcome, Executor};
use crate::filters::OrderSizer;
use crate::infrastructure::config::{Config, PollingMode};
use crate::persistence::TradeLog;
use crate::strategy::{Strategy, TriangularArbitrage, TriangularConfig};
use crate::strategy::FeeSchedule;
use crate::{ArbError, Result};

/// Blocking waits use this timeout so the shutdown flag is checked promptly
const LOOP_WAIT: Duration = Duration::from_millis(100);
const SNAPSHOT_WAIT: Duration = Duration::from_secs(30);
const READY_WAIT: Duration = Duration::from_secs(10);

pub struct Runner {
    config: Config,
    registry: Arc<SymbolRegistry>,
    book: Arc<OrderBook>,
    sizer: OrderSizer,
    strategy: TriangularArbitrage,
    feeder: WsFeeder,
    broker: Broker,
    admin: Admin,
    trade_log: TradeLog,
    balances: HashMap<String, f64>,
    shutdown: Arc<AtomicBool>,
}

impl Runner {
    /// Build and initialize the whole engine, ready for [`Runner::run`]
    pub fn initialize(config: Config) -> Result<Self> {
        tracing::info!("initializing");

        let admin = Admin::new(&config.rest_url(), &config.connection.api_key)?;

        // 1. Symbol catalog with filters
        let symbols = admin.fetch_exchange_info()?;

        let mut registry = SymbolRegistry::new();
        let mut sizer = OrderSizer::new();
        for meta in &symbols {
            let id = registry.register(&meta.name)?;
            sizer.add_symbol(id, meta.filters);
        }
        tracing::info!(symbols = registry.len(), "symbol registry populated");

        // 2. Route discovery
        let mut strategy = TriangularArbitrage::new(TriangularConfig {
            starting_asset: config.strategy.starting_asset.clone(),
            risk: config.strategy.risk,
            min_profit_ratio: config.strategy.min_profit_ratio,
            fees: FeeSchedule::new(config.strategy.default_fee, config.fees.clone()),
        });
        strategy.discover_routes(&registry, &symbols);

        // 3. Balances; a missing starting-asset balance is observation mode
        let mut balances = match admin.fetch_balances() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch balances");
                HashMap::new()
            }
        };
        let starting_asset = config.strategy.starting_asset.clone();
        // Zero balance still starts (useful for observation); the stake
        // short-circuits evaluation
        match balances.get(&starting_asset) {
            Some(&free) if free > 0.0 => {
                tracing::info!(asset = %starting_asset, balance = free, "starting balance")
            }
            _ => {
                tracing::warn!(asset = %starting_asset, "no balance for starting asset");
                balances.insert(starting_asset.clone(), 0.0);
            }
        }

        // 4. Wire clients
        let registry = Arc::new(registry);
        let book = Arc::new(OrderBook::new());

        let mut feeder = WsFeeder::new(&config.md_url(), Arc::clone(&book), Arc::clone(&registry));
        feeder.connect()?;
        if !feeder.wait_until_ready(READY_WAIT) {
            return Err(ArbError::Connection(
                "market data feed did not become ready".to_string(),
            ));
        }

        let broker = Broker::new(
            &format!(
                "https://{}:{}",
                config.connection.oe_endpoint, config.connection.oe_port
            ),
            &config.connection.api_key,
            config.strategy.live_mode,
        )?;

        // 5. Subscribe exactly the symbols the strategy references
        let subscribed: Vec<String> = strategy
            .subscribed_symbols()
            .iter()
            .filter_map(|&id| registry.name(id).map(String::from))
            .collect();
        tracing::info!(count = subscribed.len(), "subscribing to market data");
        feeder.subscribe(&subscribed)?;

        // 6. Snapshot barrier
        let (received, expected) = feeder.wait_for_snapshots(SNAPSHOT_WAIT);
        if received == expected {
            tracing::info!(received, expected, "all market data snapshots received");
        } else {
            tracing::warn!(received, expected, "timeout waiting for snapshots");
        }

        let trade_log = TradeLog::new(config.persistence.trade_log_dir.as_ref());

        tracing::info!("initialization complete");

        Ok(Self {
            config,
            registry,
            book,
            sizer,
            strategy,
            feeder,
            broker,
            admin,
            trade_log,
            balances,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked on every loop iteration; flip it to stop the engine
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn wait_for_updates(&self) -> UpdateBitmap {
        let perf = &self.config.performance;
        match perf.polling_mode {
            PollingMode::Blocking => self.book.wait_for_updates_timeout(LOOP_WAIT),
            // Pure polling: return after the spin budget so shutdown is
            // still checked between budgets
            PollingMode::BusyPoll => self
                .book
                .wait_for_updates_spin(perf.busy_poll_spin_count, Duration::ZERO),
            PollingMode::Hybrid => self
                .book
                .wait_for_updates_spin(perf.busy_poll_spin_count, LOOP_WAIT),
        }
    }

    /// Main loop: wait, evaluate, execute
    pub fn run(&mut self) {
        tracing::info!(
            mode = ?self.config.performance.polling_mode,
            "starting main loop"
        );

        let starting_asset = self.strategy.starting_asset().to_string();
        let risk = self.strategy.risk();

        while !self.shutdown.load(Ordering::Acquire) {
            if !self.feeder.is_connected() {
                tracing::error!("market data connection lost, stopping main loop");
                break;
            }

            let updated = self.wait_for_updates();
            if !updated.any() {
                continue;
            }

            let balance = self.balances.get(&starting_asset).copied().unwrap_or(0.0);
            let stake = risk * balance;

            let Some(signal) = self
                .strategy
                .on_update(&updated, &self.book, stake, &self.sizer)
            else {
                continue;
            };

            let mut executor = Executor::new(
                &self.broker,
                &self.admin,
                &self.trade_log,
                &self.registry,
                self.strategy.fees(),
                self.config.strategy.live_mode,
            );

            match executor.execute(&signal, &mut self.balances, &starting_asset) {
                Ok(ExecOutcome::Completed {
                    actual_pnl,
                    traced_pnl,
                    theoretical_pnl,
                }) => {
                    tracing::info!(actual_pnl, traced_pnl, theoretical_pnl, "sequence completed");
                }
                Ok(ExecOutcome::RolledBack) => {
                    tracing::warn!("sequence rolled back, continuing");
                }
                Ok(ExecOutcome::Compromised) => {
                    // Do not enter another sequence until an operator has
                    // reconciled the open position
                    tracing::error!(critical = true, "sequence compromised, stopping main loop");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "execution error, stopping main loop");
                    break;
                }
            }
        }

        tracing::info!("main loop finished");
    }

    pub fn shutdown(&mut self) {
        tracing::info!("shutting down");
        self.shutdown.store(true, Ordering::Release);
        self.trade_log.flush();
        self.feeder.disconnect();
    }
}
