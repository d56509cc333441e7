//! HTTP snapshot provider for the Pi's JSON API.
//!
//! `GET {base_url}/api/{metric}` returns one JSON object per metric. The
//! blocking client carries a hard timeout so a hung Pi stalls the calling
//! thread for at most that long.

use super::provider::{ProviderError, SnapshotProvider};
use crate::domain::{MetricKind, Snapshot};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Remote snapshot provider over HTTP.
pub struct HttpSnapshotProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpSnapshotProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("pidash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the snapshot endpoint for a metric.
    fn metric_url(&self, metric: MetricKind) -> String {
        format!("{}/api/{}", self.base_url, metric.as_str())
    }
}

impl SnapshotProvider for HttpSnapshotProvider {
    fn name(&self) -> &str {
        "remote_snapshot"
    }

    fn fetch(&self, metric: MetricKind) -> Result<Snapshot, ProviderError> {
        let url = self.metric_url(metric);
        debug!(%metric, %url, "fetching remote snapshot");

        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                ProviderError::Unavailable(format!("timed out fetching {url}"))
            } else {
                ProviderError::Unavailable(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("HTTP {status} from {url}")));
        }

        let body: Value = resp
            .json()
            .map_err(|e| ProviderError::Malformed(format!("invalid JSON from {url}: {e}")))?;

        Snapshot::from_json(body)
    }
}
