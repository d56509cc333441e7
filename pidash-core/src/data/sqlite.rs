//! Local SQLite store.
//!
//! Reads are opened read-only per call, so request threads never share a
//! connection. Rows are ordered by `timestamp DESC`; the equity curve takes
//! the latest 100 points and returns them oldest first.

use super::provider::{LocalDatabase, ProviderError};
use crate::domain::{parse_timestamp, MetricKind, Snapshot};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Number of equity points returned from the database.
pub const EQUITY_POINTS: usize = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trading_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    total_trades INTEGER,
    winning_trades INTEGER,
    losing_trades INTEGER,
    win_rate REAL,
    total_pnl REAL,
    avg_win REAL,
    avg_loss REAL,
    profit_factor REAL
);
CREATE INDEX IF NOT EXISTS idx_trading_performance_timestamp ON trading_performance(timestamp);

CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    total_balance REAL NOT NULL,
    available_balance REAL,
    total_pnl REAL,
    open_positions INTEGER DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_portfolio_timestamp ON portfolio_snapshots(timestamp);

CREATE TABLE IF NOT EXISTS equity_curve (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    balance REAL,
    pnl REAL
);
CREATE INDEX IF NOT EXISTS idx_equity_timestamp ON equity_curve(timestamp);

CREATE TABLE IF NOT EXISTS ml_models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    model_version TEXT,
    model_type TEXT,
    total_models INTEGER,
    feature_count INTEGER,
    format TEXT
);
";

/// SQLite-backed `LocalDatabase`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the database file and tables if missing.
    pub fn init_schema(&self) -> Result<(), ProviderError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProviderError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&self.path).map_err(sql_error)?;
        conn.execute_batch(SCHEMA).map_err(sql_error)
    }

    fn open_read_only(&self) -> Result<Connection, ProviderError> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(sql_error)
    }

    fn latest_trading_performance(conn: &Connection) -> rusqlite::Result<Option<Snapshot>> {
        conn.query_row(
            "SELECT timestamp, total_trades, winning_trades, losing_trades, win_rate,
                    total_pnl, avg_win, avg_loss, profit_factor
             FROM trading_performance ORDER BY timestamp DESC LIMIT 1",
            [],
            |row| {
                let mut fields = Map::new();
                fields.insert("total_trades".into(), int_col(row, 1)?);
                fields.insert("winning_trades".into(), int_col(row, 2)?);
                fields.insert("losing_trades".into(), int_col(row, 3)?);
                fields.insert("win_rate".into(), real_col(row, 4)?);
                fields.insert("total_pnl".into(), real_col(row, 5)?);
                fields.insert("avg_win".into(), real_col(row, 6)?);
                fields.insert("avg_loss".into(), real_col(row, 7)?);
                fields.insert("profit_factor".into(), real_col(row, 8)?);
                Ok(Snapshot::new(fields, ts_col(row, 0)?))
            },
        )
        .optional()
    }

    fn latest_portfolio(conn: &Connection) -> rusqlite::Result<Option<Snapshot>> {
        conn.query_row(
            "SELECT timestamp, total_balance, available_balance, total_pnl, open_positions
             FROM portfolio_snapshots ORDER BY timestamp DESC LIMIT 1",
            [],
            |row| {
                let mut fields = Map::new();
                fields.insert("total_balance".into(), real_col(row, 1)?);
                fields.insert("available_balance".into(), real_col(row, 2)?);
                fields.insert("total_pnl".into(), real_col(row, 3)?);
                fields.insert("open_positions".into(), int_col(row, 4)?);
                Ok(Snapshot::new(fields, ts_col(row, 0)?))
            },
        )
        .optional()
    }

    fn latest_equity(conn: &Connection) -> rusqlite::Result<Option<Snapshot>> {
        let mut stmt = conn.prepare(
            "SELECT timestamp, balance, pnl FROM equity_curve ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let mut points = stmt
            .query_map([EQUITY_POINTS as i64], |row| {
                let timestamp: String = row.get(0)?;
                Ok(json!({
                    "timestamp": timestamp,
                    "balance": real_col(row, 1)?,
                    "pnl": real_col(row, 2)?,
                }))
            })?
            .collect::<rusqlite::Result<Vec<Value>>>()?;

        if points.is_empty() {
            return Ok(None);
        }
        let newest = points[0]["timestamp"].as_str().and_then(parse_timestamp);
        points.reverse();

        let mut fields = Map::new();
        fields.insert("equity_curve".into(), Value::Array(points));
        Ok(Some(Snapshot::new(fields, newest)))
    }

    fn latest_ml_model(conn: &Connection) -> rusqlite::Result<Option<Snapshot>> {
        conn.query_row(
            "SELECT timestamp, model_version, model_type, total_models, feature_count, format
             FROM ml_models ORDER BY timestamp DESC LIMIT 1",
            [],
            |row| {
                let mut fields = Map::new();
                fields.insert("model_version".into(), text_col(row, 1)?);
                fields.insert("model_type".into(), text_col(row, 2)?);
                fields.insert("total_models".into(), int_col(row, 3)?);
                fields.insert("feature_count".into(), int_col(row, 4)?);
                fields.insert("format".into(), text_col(row, 5)?);
                Ok(Snapshot::new(fields, ts_col(row, 0)?))
            },
        )
        .optional()
    }
}

impl LocalDatabase for SqliteStore {
    fn query_latest(&self, metric: MetricKind) -> Result<Option<Snapshot>, ProviderError> {
        if !self.path.exists() {
            debug!(%metric, db = %self.path.display(), "no local database");
            return Ok(None);
        }

        let conn = self.open_read_only()?;
        let result = match metric {
            MetricKind::TradingPerformance => Self::latest_trading_performance(&conn),
            MetricKind::Portfolio => Self::latest_portfolio(&conn),
            MetricKind::EquityCurve => Self::latest_equity(&conn),
            MetricKind::MlModel => Self::latest_ml_model(&conn),
        };
        result.map_err(sql_error)
    }

    fn is_available(&self) -> bool {
        self.path.exists()
    }
}

fn sql_error(e: rusqlite::Error) -> ProviderError {
    ProviderError::Unavailable(format!("sqlite: {e}"))
}

// NULL columns read as the neutral value, matching the CSV reader.

fn int_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(Value::from(row.get::<_, Option<i64>>(idx)?.unwrap_or(0)))
}

fn real_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(Value::from(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0)))
}

fn text_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(Value::from(
        row.get::<_, Option<String>>(idx)?
            .unwrap_or_else(|| "unknown".to_string()),
    ))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .as_deref()
        .and_then(parse_timestamp))
}
