//! Metric kinds, provenance tags, and the payload served to dashboard clients.
//!
//! Every metric declares a fixed field schema. Providers are validated against
//! it, and synthesized placeholders are built from it, so clients never need
//! per-source branching.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::data::ProviderError;

/// Keys owned by `MetricPayload` itself; stripped from provider fields.
const RESERVED_KEYS: [&str; 5] = ["metric", "data_source", "warning", "timestamp", "last_updated"];

/// A metric the dashboard can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    TradingPerformance,
    Portfolio,
    EquityCurve,
    MlModel,
}

/// Value shape of a single metric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Number,
    Text,
    /// Array of `{timestamp, balance, pnl}` points.
    Series,
}

/// One required field of a metric schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

const TRADING_PERFORMANCE_FIELDS: [FieldSpec; 8] = [
    field("total_trades", FieldKind::Integer),
    field("winning_trades", FieldKind::Integer),
    field("losing_trades", FieldKind::Integer),
    field("win_rate", FieldKind::Number),
    field("total_pnl", FieldKind::Number),
    field("avg_win", FieldKind::Number),
    field("avg_loss", FieldKind::Number),
    field("profit_factor", FieldKind::Number),
];

const PORTFOLIO_FIELDS: [FieldSpec; 4] = [
    field("total_balance", FieldKind::Number),
    field("available_balance", FieldKind::Number),
    field("total_pnl", FieldKind::Number),
    field("open_positions", FieldKind::Integer),
];

const EQUITY_CURVE_FIELDS: [FieldSpec; 1] = [field("equity_curve", FieldKind::Series)];

const ML_MODEL_FIELDS: [FieldSpec; 5] = [
    field("model_version", FieldKind::Text),
    field("model_type", FieldKind::Text),
    field("total_models", FieldKind::Integer),
    field("feature_count", FieldKind::Integer),
    field("format", FieldKind::Text),
];

impl FieldSpec {
    /// Neutral value used by placeholders and for absent CSV columns.
    pub fn neutral(&self) -> Value {
        match self.kind {
            FieldKind::Integer => Value::from(0i64),
            FieldKind::Number => Value::from(0.0f64),
            FieldKind::Text => Value::from("unknown"),
            FieldKind::Series => Value::Array(Vec::new()),
        }
    }

    /// Whether `value` has the shape this field requires.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.kind {
            FieldKind::Integer | FieldKind::Number => value.is_number(),
            FieldKind::Text => value.is_string(),
            FieldKind::Series => value.is_array(),
        }
    }
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::TradingPerformance,
        MetricKind::Portfolio,
        MetricKind::EquityCurve,
        MetricKind::MlModel,
    ];

    /// Canonical snake_case name, also used in cache keys and remote URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::TradingPerformance => "trading_performance",
            MetricKind::Portfolio => "portfolio",
            MetricKind::EquityCurve => "equity_curve",
            MetricKind::MlModel => "ml_model",
        }
    }

    /// Kebab-case path segment used by the REST routes.
    pub fn route_segment(&self) -> &'static str {
        match self {
            MetricKind::TradingPerformance => "trading-performance",
            MetricKind::Portfolio => "portfolio",
            MetricKind::EquityCurve => "equity-curve",
            MetricKind::MlModel => "ml-model",
        }
    }

    pub fn required_fields(&self) -> &'static [FieldSpec] {
        match self {
            MetricKind::TradingPerformance => &TRADING_PERFORMANCE_FIELDS,
            MetricKind::Portfolio => &PORTFOLIO_FIELDS,
            MetricKind::EquityCurve => &EQUITY_CURVE_FIELDS,
            MetricKind::MlModel => &ML_MODEL_FIELDS,
        }
    }

    /// Schema-complete fields with every value neutral (zero / "unknown" / empty).
    pub fn placeholder_fields(&self) -> Map<String, Value> {
        self.required_fields()
            .iter()
            .map(|spec| (spec.name.to_string(), spec.neutral()))
            .collect()
    }

    /// Check that `fields` carries every required key with the right shape.
    ///
    /// A top-level `error` key means the producer reported a failure in-band.
    pub fn validate(&self, fields: &Map<String, Value>) -> Result<(), ProviderError> {
        if let Some(err) = fields.get("error") {
            return Err(ProviderError::Remote(error_text(err)));
        }

        let mut missing = Vec::new();
        for spec in self.required_fields() {
            match fields.get(spec.name) {
                Some(value) if spec.accepts(value) => {}
                Some(value) => {
                    return Err(ProviderError::Malformed(format!(
                        "{}: field '{}' has unexpected value {value}",
                        self, spec.name
                    )))
                }
                None => missing.push(spec.name),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Malformed(format!(
                "{}: missing fields {}",
                self,
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    /// Accepts both `equity_curve` and `equity-curve`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown metric '{s}'"))
    }
}

/// Which provider produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    RemoteSnapshot,
    LocalCsv,
    LocalDatabase,
    CachedStale,
    Synthesized,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::RemoteSnapshot => "remote_snapshot",
            DataSource::LocalCsv => "local_csv",
            DataSource::LocalDatabase => "local_database",
            DataSource::CachedStale => "cached_stale",
            DataSource::Synthesized => "synthesized",
        }
    }

    /// True only for data fetched from the remote within its cache window.
    pub fn is_live(&self) -> bool {
        matches!(self, DataSource::RemoteSnapshot)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw provider output, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub fields: Map<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(fields: Map<String, Value>, timestamp: Option<DateTime<Utc>>) -> Self {
        let mut snapshot = Self { fields, timestamp };
        snapshot.strip_reserved();
        snapshot
    }

    /// Build a snapshot from a decoded JSON document.
    ///
    /// The document must be an object. An in-band `error` key is surfaced as
    /// `ProviderError::Remote`. `timestamp` / `last_updated` become the
    /// snapshot time when parseable.
    pub fn from_json(value: Value) -> Result<Self, ProviderError> {
        let Value::Object(fields) = value else {
            return Err(ProviderError::Malformed(
                "expected a JSON object at the top level".into(),
            ));
        };

        if let Some(err) = fields.get("error") {
            return Err(ProviderError::Remote(error_text(err)));
        }

        let timestamp = ["timestamp", "last_updated"]
            .iter()
            .filter_map(|key| fields.get(*key).and_then(Value::as_str))
            .find_map(parse_timestamp);

        Ok(Self::new(fields, timestamp))
    }

    fn strip_reserved(&mut self) {
        for key in RESERVED_KEYS {
            self.fields.remove(key);
        }
    }
}

/// The value a route handler serializes for a metric request.
///
/// `fields` is flattened, so the JSON body looks like
/// `{"total_trades": 10, ..., "data_source": "local_csv", "warning": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub metric: MetricKind,
    pub data_source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetricPayload {
    pub fn from_snapshot(metric: MetricKind, data_source: DataSource, snapshot: Snapshot) -> Self {
        Self {
            metric,
            data_source,
            timestamp: snapshot.timestamp,
            warning: None,
            fields: snapshot.fields,
        }
    }

    /// Schema-complete placeholder for when no provider had anything.
    pub fn synthesized(metric: MetricKind, warning: impl Into<String>) -> Self {
        Self {
            metric,
            data_source: DataSource::Synthesized,
            timestamp: Some(Utc::now()),
            warning: Some(warning.into()),
            fields: metric.placeholder_fields(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Age of the underlying data, if the producer stamped it.
    pub fn age(&self) -> Option<chrono::Duration> {
        self.timestamp.map(|ts| Utc::now() - ts)
    }
}

/// Parse the timestamp formats the remote and the exports use.
///
/// Naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
