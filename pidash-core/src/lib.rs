//! PiDash Core: domain types, the tiered cache, and the data providers.
//!
//! This crate contains everything the fallback layer is built from:
//! - Metric kinds with their field schemas and neutral placeholders
//! - Provenance-tagged payloads (`MetricPayload`, `DataSource`)
//! - `TieredCache`: LRU + TTL cache with transparent gzip compression
//! - `Memoizer`: explicit-cache memoization that never stores failures
//! - Provider traits and implementations (HTTP remote, TCP probe, CSV exports, SQLite)

pub mod cache;
pub mod data;
pub mod domain;

pub use cache::{CacheSettings, CacheStats, CallArgs, Memoizer, TieredCache};
pub use data::{
    ConnectivityCheck, LocalDatabase, LocalFileSource, ProviderError, ProviderHealth,
    ProviderStatus, SnapshotProvider,
};
pub use domain::{DataSource, FieldKind, FieldSpec, MetricKind, MetricPayload, Snapshot};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across request threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TieredCache<MetricPayload>>();
        require_sync::<TieredCache<MetricPayload>>();
        require_send::<Memoizer<MetricPayload>>();
        require_sync::<Memoizer<MetricPayload>>();
        require_send::<ProviderHealth>();
        require_sync::<ProviderHealth>();
        require_send::<MetricPayload>();
        require_sync::<MetricPayload>();
        require_send::<data::CsvDirectory>();
        require_sync::<data::CsvDirectory>();
        require_send::<data::SqliteStore>();
        require_sync::<data::SqliteStore>();
        require_send::<data::TcpProbe>();
        require_sync::<data::TcpProbe>();
    }
}
