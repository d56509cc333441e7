//! Provider traits and structured error types.
//!
//! The fallback resolver only sees these traits, so the remote transport, the
//! export directory, and the database can be swapped out and mocked in tests.

use std::time::SystemTime;
use thiserror::Error;

use crate::domain::{MetricKind, Snapshot};

/// Why a provider had nothing usable for a metric.
///
/// None of these reach HTTP clients; the resolver treats every variant as
/// "try the next provider".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Transient failure: network timeout, unreadable file, SQL error.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Data arrived but is missing required fields or cannot be parsed.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The producer answered with an in-band error.
    #[error("remote reported error: {0}")]
    Remote(String),
}

/// Live snapshot source on the remote device.
pub trait SnapshotProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch the current snapshot for a metric. Must honor a bounded timeout.
    fn fetch(&self, metric: MetricKind) -> Result<Snapshot, ProviderError>;
}

/// Cheap liveness probe for the remote.
pub trait ConnectivityCheck: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Directory of structured exports synced from the remote.
pub trait LocalFileSource: Send + Sync {
    /// Latest export for a metric; `Ok(None)` if no export exists.
    fn read_latest(&self, metric: MetricKind) -> Result<Option<Snapshot>, ProviderError>;

    /// Modification time of the newest export of any metric.
    fn newest_modified(&self) -> Option<SystemTime>;

    /// Number of export files present.
    fn file_count(&self) -> usize;
}

/// Embedded database holding historical rows.
pub trait LocalDatabase: Send + Sync {
    /// Latest row(s) backing a metric; `Ok(None)` if there are none.
    fn query_latest(&self, metric: MetricKind) -> Result<Option<Snapshot>, ProviderError>;

    fn is_available(&self) -> bool;
}
