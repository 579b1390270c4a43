//! WebSocket quote feeder
//!
//! Owns a dedicated ingest thread driving the market-data socket on a
//! current-thread tokio runtime. Every decoded book-ticker frame is written
//! straight into the shared order book; the feeder holds only a non-owning
//! handle to the book and never calls back into the engine.
//!
//! The first update seen for each subscribed symbol doubles as its initial
//! snapshot for the startup barrier.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::core::{OrderBook, SymbolRegistry};
use crate::exchange::QuoteFeed;
use crate::{ArbError, Result};

enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

struct SnapshotState {
    expected: HashSet<String>,
    received: HashSet<String>,
}

struct FeederShared {
    ready: Mutex<bool>,
    ready_cv: Condvar,
    shutdown: AtomicBool,
    disconnected: AtomicBool,
    snapshots: Mutex<SnapshotState>,
    snapshot_cv: Condvar,
}

impl FeederShared {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            ready_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            snapshots: Mutex::new(SnapshotState {
                expected: HashSet::new(),
                received: HashSet::new(),
            }),
            snapshot_cv: Condvar::new(),
        }
    }

    fn set_ready(&self) {
        *self.ready.lock() = true;
        self.ready_cv.notify_all();
    }

    fn mark_snapshot(&self, symbol: &str) {
        let mut st = self.snapshots.lock();
        if st.expected.contains(symbol) && st.received.insert(symbol.to_string()) {
            self.snapshot_cv.notify_all();
        }
    }
}

pub struct WsFeeder {
    url: String,
    book: Arc<OrderBook>,
    registry: Arc<SymbolRegistry>,
    shared: Arc<FeederShared>,
    cmd_tx: Option<UnboundedSender<FeedCommand>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WsFeeder {
    pub fn new(url: &str, book: Arc<OrderBook>, registry: Arc<SymbolRegistry>) -> Self {
        Self {
            url: url.to_string(),
            book,
            registry,
            shared: Arc::new(FeederShared::new()),
            cmd_tx: None,
            handle: None,
        }
    }

    fn send_command(&self, cmd: FeedCommand) -> Result<()> {
        match &self.cmd_tx {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| ArbError::Connection("feed thread gone".to_string())),
            None => Err(ArbError::Connection("feed not connected".to_string())),
        }
    }
}

impl QuoteFeed for WsFeeder {
    fn connect(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(tx);

        let url = self.url.clone();
        let book = Arc::clone(&self.book);
        let registry = Arc::clone(&self.registry);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("md-feed".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build feed runtime");
                        shared.disconnected.store(true, Ordering::Release);
                        return;
                    }
                };
                rt.block_on(feed_loop(url, book, registry, Arc::clone(&shared), rx));
                shared.disconnected.store(true, Ordering::Release);
            })
            .map_err(|e| ArbError::Connection(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.cmd_tx = None; // closes the command channel
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        tracing::info!("quote feed disconnected");
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some() && !self.shared.disconnected.load(Ordering::Acquire)
    }

    fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.shared.ready.lock();
        while !*ready {
            if self
                .shared
                .ready_cv
                .wait_until(&mut ready, deadline)
                .timed_out()
            {
                return *ready;
            }
        }
        true
    }

    fn subscribe(&self, symbols: &[String]) -> Result<()> {
        {
            let mut st = self.shared.snapshots.lock();
            for s in symbols {
                st.expected.insert(s.clone());
            }
        }
        self.send_command(FeedCommand::Subscribe(symbols.to_vec()))
    }

    fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        {
            let mut st = self.shared.snapshots.lock();
            for s in symbols {
                st.expected.remove(s);
                st.received.remove(s);
            }
        }
        self.send_command(FeedCommand::Unsubscribe(symbols.to_vec()))
    }

    fn wait_for_snapshots(&self, timeout: Duration) -> (usize, usize) {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.snapshots.lock();

        while st.received.len() < st.expected.len() {
            if self
                .shared
                .snapshot_cv
                .wait_until(&mut st, deadline)
                .timed_out()
            {
                break;
            }
        }

        (st.received.len(), st.expected.len())
    }
}

impl Drop for WsFeeder {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.disconnect();
        }
    }
}

async fn feed_loop(
    url: String,
    book: Arc<OrderBook>,
    registry: Arc<SymbolRegistry>,
    shared: Arc<FeederShared>,
    mut commands: UnboundedReceiver<FeedCommand>,
) {
    let ws = match tokio::time::timeout(Duration::from_secs(10), connect_async(&url)).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            tracing::error!(url = %url, error = %e, "market data connection failed");
            return;
        }
        Err(_) => {
            tracing::error!(url = %url, "market data connection timed out");
            return;
        }
    };
    tracing::info!(url = %url, "market data connected");
    shared.set_ready();

    let (mut sink, mut stream) = ws.split();
    let mut request_id = 0u64;
    let mut shutdown_check = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                let (method, symbols) = match &cmd {
                    FeedCommand::Subscribe(s) => ("SUBSCRIBE", s),
                    FeedCommand::Unsubscribe(s) => ("UNSUBSCRIBE", s),
                };
                request_id += 1;
                let frame = subscription_frame(method, symbols, request_id);
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::error!(error = %e, "subscription send failed");
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &book, &registry, &shared);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("market data connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "market data receive failed");
                        break;
                    }
                }
            }
            _ = shutdown_check.tick() => {
                if shared.shutdown.load(Ordering::Acquire) {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}

fn subscription_frame(method: &str, symbols: &[String], id: u64) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@bookTicker", s.to_lowercase()))
        .collect();
    serde_json::json!({ "method": method, "params": streams, "id": id }).to_string()
}

/// Decode one frame and apply it to the book
///
/// Both raw-stream and combined-stream (`{"stream":..,"data":{..}}`)
/// envelopes are accepted. Frames without a symbol (subscription acks) are
/// ignored.
fn handle_frame(
    text: &str,
    book: &OrderBook,
    registry: &SymbolRegistry,
    shared: &FeederShared,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let payload = value.get("data").unwrap_or(&value);

    let Some(symbol) = payload.get("s").and_then(Value::as_str) else {
        return;
    };

    let id = registry.get_id(symbol);
    if !id.is_valid() {
        return;
    }

    let bid = price_field(payload, "b");
    let ask = price_field(payload, "a");

    book.update(id, bid, ask);
    shared.mark_snapshot(symbol);
}

fn price_field(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Arc<OrderBook>, Arc<SymbolRegistry>, FeederShared) {
        let mut registry = SymbolRegistry::new();
        registry.register("BTCUSDT").unwrap();
        registry.register("ETHBTC").unwrap();
        (
            Arc::new(OrderBook::new()),
            Arc::new(registry),
            FeederShared::new(),
        )
    }

    #[test]
    fn test_handle_raw_frame() {
        let (book, registry, shared) = fixture();
        let frame = r#"{"u":400900217,"s":"BTCUSDT","b":"50000.10","B":"31.21","a":"50000.20","A":"40.66"}"#;

        handle_frame(frame, &book, &registry, &shared);

        let q = book.get(registry.get_id("BTCUSDT"));
        assert_eq!(q.bid, 50000.10);
        assert_eq!(q.ask, 50000.20);
    }

    #[test]
    fn test_handle_combined_stream_frame() {
        let (book, registry, shared) = fixture();
        let frame = r#"{"stream":"ethbtc@bookTicker","data":{"s":"ETHBTC","b":"0.0601","a":"0.0602"}}"#;

        handle_frame(frame, &book, &registry, &shared);

        let q = book.get(registry.get_id("ETHBTC"));
        assert_eq!(q.bid, 0.0601);
        assert_eq!(q.ask, 0.0602);
    }

    #[test]
    fn test_one_sided_frame_leaves_other_side() {
        let (book, registry, shared) = fixture();
        let id = registry.get_id("BTCUSDT");
        book.update(id, 50_000.0, 50_001.0);

        // Ask-only refresh ("b" = 0 means no change)
        let frame = r#"{"s":"BTCUSDT","b":"0","a":"50002.00"}"#;
        handle_frame(frame, &book, &registry, &shared);

        let q = book.get(id);
        assert_eq!(q.bid, 50_000.0);
        assert_eq!(q.ask, 50_002.0);
    }

    #[test]
    fn test_unknown_symbol_and_ack_frames_ignored() {
        let (book, registry, shared) = fixture();

        handle_frame(r#"{"s":"NOPEUSDT","b":"1","a":"2"}"#, &book, &registry, &shared);
        handle_frame(r#"{"result":null,"id":1}"#, &book, &registry, &shared);
        handle_frame("not json", &book, &registry, &shared);

        assert!(!book.has_updates());
    }

    #[test]
    fn test_snapshot_tracking_counts_expected_only() {
        let (book, registry, shared) = fixture();
        shared.snapshots.lock().expected.insert("BTCUSDT".to_string());

        // ETHBTC is not expected; it must not count
        handle_frame(r#"{"s":"ETHBTC","b":"0.06","a":"0.0601"}"#, &book, &registry, &shared);
        assert_eq!(shared.snapshots.lock().received.len(), 0);

        handle_frame(r#"{"s":"BTCUSDT","b":"1","a":"2"}"#, &book, &registry, &shared);
        assert_eq!(shared.snapshots.lock().received.len(), 1);

        // Repeated updates do not double-count
        handle_frame(r#"{"s":"BTCUSDT","b":"3","a":"4"}"#, &book, &registry, &shared);
        assert_eq!(shared.snapshots.lock().received.len(), 1);
    }

    #[test]
    fn test_subscription_frame_format() {
        let frame = subscription_frame("SUBSCRIBE", &["BTCUSDT".to_string()], 7);
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["method"], "SUBSCRIBE");
        assert_eq!(v["params"][0], "btcusdt@bookTicker");
        assert_eq!(v["id"], 7);
    }
}
