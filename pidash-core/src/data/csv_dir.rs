//! Local CSV export directory.
//!
//! Layout: `{data_dir}/trades_summary.csv`, `{data_dir}/portfolio.csv`,
//! `{data_dir}/equity.csv`, synced from the Pi.
//!
//! Every file is validated before parsing:
//! - `.csv` extension and size at most `max_file_bytes`
//! - first KiB free of script-injection markers
//! - header contains a `timestamp` column
//!
//! Scalar metrics read the last row; columns absent from the header fall back
//! to the field's neutral value, cells that fail to parse make the file malformed.

use super::provider::{LocalFileSource, ProviderError};
use crate::domain::{FieldKind, FieldSpec, MetricKind, Snapshot};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Default upper bound on export size (10 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

const SUSPICIOUS_MARKERS: [&str; 4] = ["<script", "javascript:", "eval(", "exec("];

/// Reader over the local export directory.
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    dir: PathBuf,
    max_file_bytes: u64,
}

impl CsvDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Export file backing a metric, if the Pi exports one.
    pub fn file_name(metric: MetricKind) -> Option<&'static str> {
        match metric {
            MetricKind::TradingPerformance => Some("trades_summary.csv"),
            MetricKind::Portfolio => Some("portfolio.csv"),
            MetricKind::EquityCurve => Some("equity.csv"),
            MetricKind::MlModel => None,
        }
    }

    /// Paths of all `.csv` files in the directory.
    fn csv_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_csv_extension(path))
            .collect()
    }

    /// Reject files that are too large, mis-named, or look like injected content.
    fn validate_file(&self, path: &Path) -> Result<(), ProviderError> {
        if !has_csv_extension(path) {
            return Err(ProviderError::Malformed(format!(
                "{} is not a .csv file",
                path.display()
            )));
        }

        let meta = fs::metadata(path)
            .map_err(|e| ProviderError::Unavailable(format!("stat {}: {e}", path.display())))?;
        if meta.len() > self.max_file_bytes {
            return Err(ProviderError::Malformed(format!(
                "{} is {} bytes (limit {})",
                path.display(),
                meta.len(),
                self.max_file_bytes
            )));
        }

        let mut head = Vec::with_capacity(1024);
        File::open(path)
            .and_then(|f| f.take(1024).read_to_end(&mut head))
            .map_err(|e| ProviderError::Unavailable(format!("read {}: {e}", path.display())))?;
        let head = String::from_utf8_lossy(&head).to_ascii_lowercase();
        if let Some(marker) = SUSPICIOUS_MARKERS.iter().find(|m| head.contains(*m)) {
            warn!(file = %path.display(), marker = *marker, "suspicious content in export");
            return Err(ProviderError::Malformed(format!(
                "{} contains suspicious content",
                path.display()
            )));
        }

        Ok(())
    }
}

impl LocalFileSource for CsvDirectory {
    fn read_latest(&self, metric: MetricKind) -> Result<Option<Snapshot>, ProviderError> {
        let Some(name) = Self::file_name(metric) else {
            return Ok(None);
        };
        let path = self.dir.join(name);
        if !path.exists() {
            debug!(%metric, file = %path.display(), "no local export");
            return Ok(None);
        }

        self.validate_file(&path)?;

        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .ok();

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| ProviderError::Unavailable(format!("open {}: {e}", path.display())))?;
        let headers = reader
            .headers()
            .map_err(|e| ProviderError::Malformed(format!("{}: bad header: {e}", path.display())))?
            .clone();
        if !headers.iter().any(|h| h.trim() == "timestamp") {
            return Err(ProviderError::Malformed(format!(
                "{}: missing 'timestamp' column",
                path.display()
            )));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| ProviderError::Malformed(format!("{}: {e}", path.display())))?;
            rows.push(record);
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let fields = if metric == MetricKind::EquityCurve {
            equity_series(&rows, &column)?
        } else {
            let last = &rows[rows.len() - 1];
            let mut fields = Map::new();
            for spec in metric.required_fields() {
                let cell = column(spec.name).and_then(|i| last.get(i));
                fields.insert(spec.name.to_string(), parse_cell(spec, cell)?);
            }
            fields
        };

        Ok(Some(Snapshot::new(fields, modified)))
    }

    fn newest_modified(&self) -> Option<SystemTime> {
        self.csv_files()
            .iter()
            .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
            .max()
    }

    fn file_count(&self) -> usize {
        self.csv_files().len()
    }
}

fn equity_series(
    rows: &[csv::StringRecord],
    column: &dyn Fn(&str) -> Option<usize>,
) -> Result<Map<String, Value>, ProviderError> {
    const BALANCE: FieldSpec = FieldSpec {
        name: "balance",
        kind: FieldKind::Number,
    };
    const PNL: FieldSpec = FieldSpec {
        name: "pnl",
        kind: FieldKind::Number,
    };

    let ts_col = column("timestamp");
    let balance_col = column("balance");
    let pnl_col = column("pnl");

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let timestamp = ts_col.and_then(|i| row.get(i)).unwrap_or("").trim();
        points.push(json!({
            "timestamp": timestamp,
            "balance": parse_cell(&BALANCE, balance_col.and_then(|i| row.get(i)))?,
            "pnl": parse_cell(&PNL, pnl_col.and_then(|i| row.get(i)))?,
        }));
    }

    let mut fields = Map::new();
    fields.insert("equity_curve".to_string(), Value::Array(points));
    Ok(fields)
}

/// Convert a CSV cell into the JSON shape `spec` requires.
///
/// Empty or absent cells (and `N/A`/`nan`) become the neutral value.
fn parse_cell(spec: &FieldSpec, cell: Option<&str>) -> Result<Value, ProviderError> {
    let raw = cell.map(str::trim).unwrap_or("");
    if raw.is_empty() || raw.eq_ignore_ascii_case("n/a") || raw.eq_ignore_ascii_case("nan") {
        return Ok(spec.neutral());
    }

    let bad = || ProviderError::Malformed(format!("column '{}': cannot parse '{raw}'", spec.name));
    match spec.kind {
        FieldKind::Integer => {
            if let Ok(n) = raw.parse::<i64>() {
                return Ok(Value::from(n));
            }
            let f = raw.parse::<f64>().map_err(|_| bad())?;
            if f.is_finite() && f.fract() == 0.0 {
                Ok(Value::from(f as i64))
            } else {
                Err(bad())
            }
        }
        FieldKind::Number => {
            let f = raw.parse::<f64>().map_err(|_| bad())?;
            if f.is_finite() {
                Ok(Value::from(f))
            } else {
                Err(bad())
            }
        }
        FieldKind::Text => Ok(Value::from(raw)),
        FieldKind::Series => Err(bad()),
    }
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_export_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let source = CsvDirectory::new(tmp.path());
        assert_eq!(source.read_latest(MetricKind::Portfolio).unwrap(), None);
        assert_eq!(source.read_latest(MetricKind::MlModel).unwrap(), None);
        assert_eq!(source.file_count(), 0);
        assert!(source.newest_modified().is_none());
    }

    #[test]
    fn trading_performance_reads_last_row_and_fills_missing_columns() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "trades_summary.csv",
            "timestamp,total_trades,unique_requests,winning_trades,losing_trades,win_rate\n\
             2024-01-01T00:00:00Z,4,2,3,1,0.75\n\
             2024-01-02T00:00:00Z,10,5,6,4,0.6\n",
        );
        let snapshot = CsvDirectory::new(tmp.path())
            .read_latest(MetricKind::TradingPerformance)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.fields["total_trades"], 10);
        assert_eq!(snapshot.fields["winning_trades"], 6);
        assert_eq!(snapshot.fields["win_rate"], 0.6);
        assert_eq!(snapshot.fields["total_pnl"], 0.0);
        assert!(snapshot.timestamp.is_some());
        assert!(MetricKind::TradingPerformance.validate(&snapshot.fields).is_ok());
    }

    #[test]
    fn equity_reads_every_row() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "equity.csv",
            "timestamp,balance,pnl\n2024-01-01T00:00:00Z,1000,0\n2024-01-01T01:00:00Z,1050,50\n",
        );
        let snapshot = CsvDirectory::new(tmp.path())
            .read_latest(MetricKind::EquityCurve)
            .unwrap()
            .unwrap();
        let curve = snapshot.fields["equity_curve"].as_array().unwrap();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[1]["balance"], 1050.0);
        assert_eq!(curve[1]["pnl"], 50.0);
        assert_eq!(curve[0]["timestamp"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn header_only_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "portfolio.csv", "timestamp,total_balance\n");
        assert_eq!(
            CsvDirectory::new(tmp.path()).read_latest(MetricKind::Portfolio).unwrap(),
            None
        );
    }

    #[test]
    fn unparsable_number_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "portfolio.csv",
            "timestamp,total_balance\n2024-01-01T00:00:00Z,lots\n",
        );
        let err = CsvDirectory::new(tmp.path())
            .read_latest(MetricKind::Portfolio)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn missing_timestamp_column_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "portfolio.csv", "total_balance\n1000\n");
        assert!(matches!(
            CsvDirectory::new(tmp.path()).read_latest(MetricKind::Portfolio),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn suspicious_content_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "portfolio.csv",
            "timestamp,total_balance\n<script>alert(1)</script>,1000\n",
        );
        assert!(matches!(
            CsvDirectory::new(tmp.path()).read_latest(MetricKind::Portfolio),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "portfolio.csv",
            "timestamp,total_balance\n2024-01-01T00:00:00Z,1000\n",
        );
        let source = CsvDirectory::new(tmp.path()).with_max_file_bytes(8);
        assert!(matches!(
            source.read_latest(MetricKind::Portfolio),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn newest_modified_tracks_latest_file() {
        let tmp = tempfile::tempdir().unwrap();
        let old = write(tmp.path(), "equity.csv", "timestamp,balance,pnl\n");
        write(tmp.path(), "portfolio.csv", "timestamp,total_balance\n");
        write(tmp.path(), "notes.txt", "ignored");

        let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 3600);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();

        let source = CsvDirectory::new(tmp.path());
        assert_eq!(source.file_count(), 2);
        let newest = source.newest_modified().unwrap();
        assert!(newest > two_hours_ago);
    }
}
