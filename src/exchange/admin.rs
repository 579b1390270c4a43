//! REST administrative client
//!
//! Fetches the symbol catalog (with filters) and account balances. Request
//! signing and credential management live outside the engine; only the API
//! key header travels with requests here.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::core::SymbolMeta;
use crate::exchange::AdminApi;
use crate::filters::SymbolFilters;
use crate::{ArbError, Result};

pub struct Admin {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl Admin {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ArbError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(query)
            .send()
            .map_err(|e| ArbError::Rest(format!("{path}: {e}")))?;

        if !resp.status().is_success() {
            let code = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(ArbError::Rest(format!("{path}: HTTP {code}: {body}")));
        }

        resp.json()
            .map_err(|e| ArbError::Rest(format!("{path}: bad body: {e}")))
    }
}

impl AdminApi for Admin {
    fn fetch_exchange_info(&self) -> Result<Vec<SymbolMeta>> {
        tracing::info!("fetching exchange info");
        let body = self.get_json("/api/v3/exchangeInfo", &[("permissions", "SPOT")])?;
        let symbols = parse_exchange_info(&body)?;
        tracing::info!(symbols = symbols.len(), "loaded symbol catalog");
        Ok(symbols)
    }

    fn fetch_balances(&self) -> Result<HashMap<String, f64>> {
        tracing::info!("fetching account balances");
        let body = self.get_json("/api/v3/account", &[("omitZeroBalances", "true")])?;
        let balances = parse_balances(&body);
        tracing::info!(assets = balances.len(), "loaded non-zero balances");
        Ok(balances)
    }
}

/// Extract tradable symbols and their filters from an exchange-info payload
pub(crate) fn parse_exchange_info(body: &Value) -> Result<Vec<SymbolMeta>> {
    let Some(list) = body.get("symbols").and_then(Value::as_array) else {
        return Err(ArbError::Rest(
            "exchange info response missing 'symbols'".to_string(),
        ));
    };

    let mut out = Vec::with_capacity(list.len());
    for entry in list {
        // Only symbols currently open for spot trading
        if entry.get("status").and_then(Value::as_str) != Some("TRADING") {
            continue;
        }

        let (Some(name), Some(base), Some(quote)) = (
            entry.get("symbol").and_then(Value::as_str),
            entry.get("baseAsset").and_then(Value::as_str),
            entry.get("quoteAsset").and_then(Value::as_str),
        ) else {
            continue;
        };
        if name.is_empty() || base.is_empty() || quote.is_empty() {
            continue;
        }

        let filters = entry
            .get("filters")
            .map(SymbolFilters::from_json)
            .unwrap_or_default();

        out.push(SymbolMeta::new(name, base, quote, filters));
    }

    Ok(out)
}

/// Extract non-zero free balances from an account payload
pub(crate) fn parse_balances(body: &Value) -> HashMap<String, f64> {
    let mut out = HashMap::new();

    let Some(balances) = body.get("balances").and_then(Value::as_array) else {
        tracing::warn!("account response missing 'balances'");
        return out;
    };

    for entry in balances {
        let Some(asset) = entry.get("asset").and_then(Value::as_str) else {
            continue;
        };
        let free = match entry.get("free") {
            Some(Value::String(s)) => s.parse().unwrap_or(0.0),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        };
        if !asset.is_empty() && free > 0.0 {
            out.insert(asset.to_string(), free);
        }
    }

    out
}
