//! Append-only CSV trade log for auditing and analysis
//!
//! One file per UTC calendar day (`trades_YYYYMMDD.csv`), header written on
//! creation, flushed after every record. Recording is best-effort: write
//! failures are logged and reported but never stop the engine.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

/// Leg position within an arbitrage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    Entry,
    Intermediate,
    Exit,
}

impl LegKind {
    /// Kind for a zero-based leg index in a three-leg sequence
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Entry,
            1 => Self::Intermediate,
            _ => Self::Exit,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Intermediate => "INTERMEDIATE",
            Self::Exit => "EXIT",
        }
    }
}

/// Outcome recorded for one leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Executed,
    Partial,
    Failed,
    Rollback,
}

impl TradeStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "EXECUTED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::Rollback => "ROLLBACK",
        }
    }
}

/// One audit row
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub trade_id: String,
    pub parent_id: String,
    pub leg_kind: LegKind,
    pub symbol: String,
    pub side: String,
    pub intended_price: f64,
    pub intended_qty: f64,
    pub actual_price: f64,
    pub actual_qty: f64,
    pub status: TradeStatus,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub timestamp: DateTime<Utc>,
}

const HEADER: &str = "trade_id,parent_trade_id,trade_type,symbol,side,\
intended_price,intended_qty,actual_price,actual_qty,status,pnl,pnl_pct,timestamp";

struct LogInner {
    file: Option<File>,
    current_date: String,
}

/// Thread-safe daily-rotating CSV writer
pub struct TradeLog {
    output_dir: PathBuf,
    inner: Mutex<LogInner>,
    sequence: AtomicU64,
}

impl TradeLog {
    /// Create the output directory if needed; files open lazily
    pub fn new(output_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(output_dir) {
            tracing::error!(dir = %output_dir.display(), error = %e, "failed to create trade log directory");
        } else {
            tracing::info!(dir = %output_dir.display(), "trade log initialized");
        }

        Self {
            output_dir: output_dir.to_path_buf(),
            inner: Mutex::new(LogInner {
                file: None,
                current_date: String::new(),
            }),
            sequence: AtomicU64::new(0),
        }
    }

    /// Start a new arbitrage sequence, returning the parent trade ID that
    /// ties its legs together
    pub fn next_parent_id(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ARB_{millis}_{n}")
    }

    /// Append one record; returns false on write failure (best-effort)
    pub fn record(&self, record: &TradeRecord) -> bool {
        let mut inner = self.inner.lock();

        if !self.ensure_file_ready(&mut inner) {
            return false;
        }

        let line = format_record(record);
        let Some(file) = inner.file.as_mut() else {
            return false;
        };

        let ok = writeln!(file, "{line}").is_ok() && file.flush().is_ok();
        if !ok {
            tracing::error!(trade_id = %record.trade_id, "trade log write failed");
        } else {
            tracing::debug!(
                trade_id = %record.trade_id,
                leg = record.leg_kind.as_str(),
                "trade recorded"
            );
        }
        ok
    }

    /// Flush any buffered output
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        if let Some(file) = inner.file.as_mut() {
            let _ = file.flush();
        }
    }

    fn filename_for(&self, date: &str) -> PathBuf {
        self.output_dir.join(format!("trades_{date}.csv"))
    }

    /// Open (and rotate) the day's file; header only when newly created.
    /// Must be called with the inner lock held.
    fn ensure_file_ready(&self, inner: &mut LogInner) -> bool {
        let today = Utc::now().format("%Y%m%d").to_string();

        if inner.file.is_some() && inner.current_date == today {
            return true;
        }

        if let Some(file) = inner.file.as_mut() {
            let _ = file.flush();
        }
        inner.file = None;
        inner.current_date = today.clone();

        let path = self.filename_for(&today);
        let existed = path.exists();

        let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to open trade log");
                return false;
            }
        };

        if !existed {
            if writeln!(file, "{HEADER}").is_err() {
                tracing::error!(path = %path.display(), "failed to write trade log header");
                return false;
            }
            let _ = file.flush();
            tracing::info!(path = %path.display(), "created new trade log");
        }

        inner.file = Some(file);
        true
    }
}

fn format_record(r: &TradeRecord) -> String {
    format!(
        "{},{},{},{},{},{:.8},{:.8},{:.8},{:.8},{},{:.8},{:.4},{}",
        escape_csv(&r.trade_id),
        escape_csv(&r.parent_id),
        r.leg_kind.as_str(),
        escape_csv(&r.symbol),
        escape_csv(&r.side),
        r.intended_price,
        r.intended_qty,
        r.actual_price,
        r.actual_qty,
        r.status.as_str(),
        r.pnl,
        r.pnl_pct,
        r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Quote a field containing comma, quote, CR or LF; double inner quotes
fn escape_csv(value: &str) -> String {
    if !value.contains([',', '"', '\n', '\r']) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}
