//! Process-wide context: one cache and one resolver, built once at startup.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use pidash_core::data::{CsvDirectory, HttpSnapshotProvider, SqliteStore, TcpProbe};
use pidash_core::{MetricPayload, TieredCache};
use std::sync::Arc;
use tracing::info;

use crate::config::DashboardConfig;
use crate::fallback::{Collaborators, FallbackResolver};

/// Shared by every request handler behind an `Arc`.
pub struct AppContext {
    pub config: DashboardConfig,
    pub cache: Arc<TieredCache<MetricPayload>>,
    pub resolver: FallbackResolver,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Build the production providers from `config`.
    ///
    /// Creates a blocking HTTP client, so call this outside an async runtime.
    pub fn from_config(config: DashboardConfig) -> anyhow::Result<Self> {
        let remote = HttpSnapshotProvider::new(config.remote.base_url(), config.remote.timeout())
            .context("building remote snapshot client")?;
        let probe = TcpProbe::new(
            config.remote.host.clone(),
            config.remote.api_port,
            config.remote.probe_timeout(),
        );
        let files = CsvDirectory::new(config.data.data_dir.clone())
            .with_max_file_bytes(config.data.max_csv_bytes);
        let database = SqliteStore::new(config.data.database_path.clone());

        info!(
            remote = %remote.base_url(),
            data_dir = %config.data.data_dir.display(),
            database = %config.data.database_path.display(),
            "dashboard context initialized"
        );

        Ok(Self::with_collaborators(
            config,
            Collaborators {
                remote: Arc::new(remote),
                connectivity: Arc::new(probe),
                files: Arc::new(files),
                database: Arc::new(database),
            },
        ))
    }

    /// Build around caller-supplied providers.
    pub fn with_collaborators(config: DashboardConfig, sources: Collaborators) -> Self {
        let cache = Arc::new(TieredCache::new(config.cache.settings()));
        let resolver =
            FallbackResolver::new(Arc::clone(&cache), sources, config.resolver_settings());
        Self {
            config,
            cache,
            resolver,
            started_at: Utc::now(),
        }
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
