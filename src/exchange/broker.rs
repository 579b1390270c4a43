//! Order-entry client
//!
//! Live orders go out over the venue's REST order endpoint; order state is
//! tracked in a map behind a mutex + condvar so callers can block until a
//! terminal status. In test mode orders are never sent: they fill
//! instantly at the caller's estimated price, which keeps the execution
//! state machine identical in both modes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::core::Side;
use crate::exchange::{OrderEntry, OrderState, OrderStatus};
use crate::Result;

struct TrackedOrder {
    state: OrderState,
    status: OrderStatus,
}

pub struct Broker {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    live_mode: bool,
    orders: Mutex<HashMap<String, TrackedOrder>>,
    cv: Condvar,
    counter: AtomicU64,
}

impl Broker {
    pub fn new(base_url: &str, api_key: &str, live_mode: bool) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::ArbError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            live_mode,
            orders: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn is_live_mode(&self) -> bool {
        self.live_mode
    }

    fn generate_cl_ord_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("TA{millis}_{n}")
    }

    fn store(&self, cl_ord_id: &str, state: OrderState, status: OrderStatus) {
        let mut orders = self.orders.lock();
        orders.insert(
            cl_ord_id.to_string(),
            TrackedOrder { state, status },
        );
        drop(orders);
        self.cv.notify_all();
    }

    fn submit_live(&self, cl_ord_id: &str, symbol: &str, side: Side, qty: f64) {
        let url = format!("{}/api/v3/order", self.base_url);
        let qty_str = format!("{qty:.8}");
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[
                ("symbol", symbol),
                ("side", side.as_str()),
                ("type", "MARKET"),
                ("quantity", qty_str.as_str()),
                ("newClientOrderId", cl_ord_id),
            ])
            .send();

        let (status, state) = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>() {
                Ok(body) => parse_order_response(cl_ord_id, symbol, qty, &body),
                Err(e) => rejected(cl_ord_id, symbol, qty, &format!("bad response body: {e}")),
            },
            Ok(resp) => {
                let code = resp.status();
                let body = resp.text().unwrap_or_default();
                rejected(cl_ord_id, symbol, qty, &format!("HTTP {code}: {body}"))
            }
            Err(e) => rejected(cl_ord_id, symbol, qty, &format!("transport: {e}")),
        };

        if status == OrderStatus::Rejected {
            tracing::error!(
                cl_ord_id,
                symbol,
                reason = %state.reject_reason,
                "order rejected"
            );
        }
        self.store(cl_ord_id, state, status);
    }
}

impl OrderEntry for Broker {
    fn send_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        est_price: f64,
    ) -> Result<String> {
        if !self.live_mode {
            tracing::warn!(symbol, "test mode - order not sent to exchange");
            return self.test_market_order(symbol, side, qty, est_price);
        }

        let cl_ord_id = self.generate_cl_ord_id();
        tracing::info!(
            cl_ord_id = %cl_ord_id,
            symbol,
            side = %side,
            qty,
            est_price,
            "sending market order"
        );

        self.submit_live(&cl_ord_id, symbol, side, qty);
        Ok(cl_ord_id)
    }

    fn test_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        est_price: f64,
    ) -> Result<String> {
        let cl_ord_id = self.generate_cl_ord_id();
        tracing::info!(
            cl_ord_id = %cl_ord_id,
            symbol,
            side = %side,
            qty,
            est_price,
            "test market order (simulated fill)"
        );

        // Instant fill at the estimated price
        self.store(
            &cl_ord_id,
            OrderState {
                cl_ord_id: cl_ord_id.clone(),
                symbol: symbol.to_string(),
                order_qty: qty,
                filled_qty: qty,
                avg_price: est_price,
                reject_reason: String::new(),
            },
            OrderStatus::Filled,
        );

        Ok(cl_ord_id)
    }

    fn wait_for_completion(&self, cl_ord_id: &str, timeout: Duration) -> OrderStatus {
        let deadline = Instant::now() + timeout;
        let mut orders = self.orders.lock();

        loop {
            if let Some(tracked) = orders.get(cl_ord_id) {
                if tracked.status.is_terminal() {
                    return tracked.status;
                }
            }

            if self.cv.wait_until(&mut orders, deadline).timed_out() {
                // Final check under the lock before declaring Unknown
                if let Some(tracked) = orders.get(cl_ord_id) {
                    if tracked.status.is_terminal() {
                        return tracked.status;
                    }
                }
                tracing::warn!(cl_ord_id, "timeout waiting for order completion");
                return OrderStatus::Unknown;
            }
        }
    }

    fn order_state(&self, cl_ord_id: &str) -> OrderState {
        self.orders
            .lock()
            .get(cl_ord_id)
            .map(|t| t.state.clone())
            .unwrap_or_default()
    }
}

fn rejected(cl_ord_id: &str, symbol: &str, qty: f64, reason: &str) -> (OrderStatus, OrderState) {
    (
        OrderStatus::Rejected,
        OrderState {
            cl_ord_id: cl_ord_id.to_string(),
            symbol: symbol.to_string(),
            order_qty: qty,
            filled_qty: 0.0,
            avg_price: 0.0,
            reject_reason: reason.to_string(),
        },
    )
}

/// Parse a venue order-placement response into tracked state
fn parse_order_response(
    cl_ord_id: &str,
    symbol: &str,
    qty: f64,
    body: &Value,
) -> (OrderStatus, OrderState) {
    let status = match body.get("status").and_then(Value::as_str) {
        Some("FILLED") => OrderStatus::Filled,
        Some("CANCELED") => OrderStatus::Canceled,
        Some("REJECTED") => OrderStatus::Rejected,
        Some("EXPIRED") | Some("EXPIRED_IN_MATCH") => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    };

    let filled_qty = num_field(body, "executedQty");
    let quote_qty = num_field(body, "cummulativeQuoteQty");

    // Average price from fills when present, else from the quote total
    let avg_price = match body.get("fills").and_then(Value::as_array) {
        Some(fills) if !fills.is_empty() => {
            let mut cost = 0.0;
            let mut amount = 0.0;
            for fill in fills {
                let px = num_field(fill, "price");
                let fq = num_field(fill, "qty");
                cost += px * fq;
                amount += fq;
            }
            if amount > 0.0 {
                cost / amount
            } else {
                0.0
            }
        }
        _ if filled_qty > 0.0 => quote_qty / filled_qty,
        _ => 0.0,
    };

    (
        status,
        OrderState {
            cl_ord_id: cl_ord_id.to_string(),
            symbol: symbol.to_string(),
            order_qty: qty,
            filled_qty,
            avg_price,
            reject_reason: body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
    )
}

fn num_field(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_broker() -> Broker {
        Broker::new("https://example.invalid", "key", false).unwrap()
    }

    #[test]
    fn test_simulated_fill_is_instant() {
        let broker = test_broker();
        let id = broker
            .test_market_order("BTCUSDT", Side::Buy, 0.5, 50_000.0)
            .unwrap();

        let status = broker.wait_for_completion(&id, Duration::from_millis(10));
        assert_eq!(status, OrderStatus::Filled);

        let state = broker.order_state(&id);
        assert_eq!(state.filled_qty, 0.5);
        assert_eq!(state.avg_price, 50_000.0);
        assert_eq!(state.symbol, "BTCUSDT");
    }

    #[test]
    fn test_send_in_test_mode_simulates() {
        let broker = test_broker();
        let id = broker
            .send_market_order("ETHUSDT", Side::Sell, 2.0, 3000.0)
            .unwrap();
        assert_eq!(
            broker.wait_for_completion(&id, Duration::from_millis(10)),
            OrderStatus::Filled
        );
    }

    #[test]
    fn test_unknown_order_times_out() {
        let broker = test_broker();
        let status = broker.wait_for_completion("NOPE", Duration::from_millis(20));
        assert_eq!(status, OrderStatus::Unknown);
        assert_eq!(broker.order_state("NOPE").filled_qty, 0.0);
    }

    #[test]
    fn test_cl_ord_ids_unique() {
        let broker = test_broker();
        let a = broker
            .test_market_order("BTCUSDT", Side::Buy, 1.0, 1.0)
            .unwrap();
        let b = broker
            .test_market_order("BTCUSDT", Side::Buy, 1.0, 1.0)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_filled_response_with_fills() {
        let body = json!({
            "status": "FILLED",
            "executedQty": "2.00000000",
            "cummulativeQuoteQty": "6001.00000000",
            "fills": [
                { "price": "3000.00000000", "qty": "1.00000000" },
                { "price": "3001.00000000", "qty": "1.00000000" }
            ]
        });
        let (status, state) = parse_order_response("TA1_1", "ETHUSDT", 2.0, &body);
        assert_eq!(status, OrderStatus::Filled);
        assert_eq!(state.filled_qty, 2.0);
        assert!((state.avg_price - 3000.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_expired_partial_response() {
        let body = json!({
            "status": "EXPIRED",
            "executedQty": "0.40000000",
            "cummulativeQuoteQty": "1200.00000000"
        });
        let (status, state) = parse_order_response("TA1_2", "ETHUSDT", 2.0, &body);
        assert_eq!(status, OrderStatus::Expired);
        assert_eq!(state.filled_qty, 0.4);
        assert!((state.avg_price - 3000.0).abs() < 1e-9);
    }
}
