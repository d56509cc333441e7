//! Fallback resolution for dashboard metrics.
//!
//! Implements the provider priority for every metric request:
//! 1. Remote snapshot, if reachable and the synced exports are not stale
//!    (memoized for `live_ttl`)
//! 2. Latest local CSV export
//! 3. Latest local database rows
//! 4. Last known good remote payload, ignoring its expiry
//! 5. Synthesized placeholder (never fails)
//!
//! Every step reports "nothing usable" instead of an error, so `resolve`
//! always produces a payload. The caller reads `data_source` to decide how
//! to present it.

use chrono::Utc;
use pidash_core::{
    CacheStats, CallArgs, ConnectivityCheck, DataSource, LocalDatabase, LocalFileSource, Memoizer,
    MetricKind, MetricPayload, ProviderError, ProviderHealth, ProviderStatus, Snapshot,
    SnapshotProvider, TieredCache,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Timing policy for the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Exports older than this count as stale and force the fallback path.
    pub freshness_threshold: Duration,
    /// How long a live remote payload is reused without re-fetching.
    pub live_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            freshness_threshold: Duration::from_secs(2 * 3600),
            live_ttl: Duration::from_secs(60),
        }
    }
}

/// The four data collaborators, behind trait objects.
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn SnapshotProvider>,
    pub connectivity: Arc<dyn ConnectivityCheck>,
    pub files: Arc<dyn LocalFileSource>,
    pub database: Arc<dyn LocalDatabase>,
}

/// Snapshot of the resolver's view of its sources, for the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackStatus {
    pub remote_reachable: bool,
    pub fallback_needed: bool,
    pub newest_export_age_secs: Option<u64>,
    pub local_file_count: usize,
    pub local_files_available: bool,
    pub database_available: bool,
    pub freshness_threshold_secs: u64,
    pub providers: BTreeMap<String, ProviderStatus>,
    pub cache: CacheStats,
}

pub struct FallbackResolver {
    cache: Arc<TieredCache<MetricPayload>>,
    live: Memoizer<MetricPayload>,
    sources: Collaborators,
    remote_health: ProviderHealth,
    files_health: ProviderHealth,
    database_health: ProviderHealth,
    settings: ResolverSettings,
}

impl FallbackResolver {
    pub fn new(
        cache: Arc<TieredCache<MetricPayload>>,
        sources: Collaborators,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            live: Memoizer::new(Arc::clone(&cache), settings.live_ttl, "live:"),
            cache,
            sources,
            remote_health: ProviderHealth::new(DataSource::RemoteSnapshot.as_str()),
            files_health: ProviderHealth::new(DataSource::LocalCsv.as_str()),
            database_health: ProviderHealth::new(DataSource::LocalDatabase.as_str()),
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<TieredCache<MetricPayload>> {
        &self.cache
    }

    /// Freshest usable payload for `metric`. Never fails.
    pub fn resolve(&self, metric: MetricKind) -> MetricPayload {
        match panic::catch_unwind(AssertUnwindSafe(|| self.resolve_chain(metric))) {
            Ok(payload) => payload,
            Err(_) => {
                error!(%metric, "fallback chain panicked, serving placeholder");
                MetricPayload::synthesized(
                    metric,
                    "Internal error while loading data; showing placeholder values",
                )
            }
        }
    }

    fn resolve_chain(&self, metric: MetricKind) -> MetricPayload {
        let reachable = self.sources.connectivity.is_reachable();
        self.remote_health.set_reachable(reachable);
        let stale_for = self
            .exports_age()
            .filter(|age| *age > self.settings.freshness_threshold);

        if reachable && stale_for.is_none() {
            if let Some(payload) = self.try_remote(metric) {
                return payload;
            }
        } else if reachable {
            info!(%metric, "local exports are stale, skipping remote snapshot");
        } else {
            info!(%metric, "remote unreachable, using local data");
        }

        if let Some(payload) = self
            .try_local_files(metric)
            .or_else(|| self.try_database(metric))
        {
            return match stale_for {
                Some(age) if payload.warning.is_none() => payload.with_warning(format!(
                    "Synced exports are {} old; the remote may have stopped updating",
                    describe_age(age)
                )),
                _ => payload,
            };
        }

        self.try_last_good(metric).unwrap_or_else(|| {
            warn!(%metric, "no source had data, synthesizing placeholder");
            MetricPayload::synthesized(
                metric,
                "No data available from the remote or local sources; showing placeholder values",
            )
        })
    }

    /// True when the remote is down or the synced exports are older than
    /// the freshness threshold. No exports at all is not staleness.
    pub fn is_fallback_needed(&self, reachable: bool) -> bool {
        !reachable || self.exports_stale()
    }

    fn exports_age(&self) -> Option<Duration> {
        self.sources
            .files
            .newest_modified()
            .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    fn exports_stale(&self) -> bool {
        self.exports_age()
            .is_some_and(|age| age > self.settings.freshness_threshold)
    }

    fn try_remote(&self, metric: MetricKind) -> Option<MetricPayload> {
        let args = CallArgs::new().arg(metric);
        let result = self.live.call("snapshot", &args, || {
            let snapshot = self.sources.remote.fetch(metric)?;
            metric.validate(&snapshot.fields)?;

            let mut payload =
                MetricPayload::from_snapshot(metric, DataSource::RemoteSnapshot, snapshot);
            payload.timestamp.get_or_insert_with(Utc::now);

            self.remote_health.record_success();
            // Never expires, so expiry sweeps keep it; only LRU eviction drops it.
            self.cache
                .set(last_good_key(metric), payload.clone(), Duration::MAX);
            Ok::<_, ProviderError>(Some(payload))
        });

        match result {
            Ok(payload) => payload,
            Err(e) => {
                self.remote_health.record_failure();
                warn!(
                    %metric,
                    provider = self.sources.remote.name(),
                    error = %e,
                    "remote snapshot failed, falling back"
                );
                None
            }
        }
    }

    fn try_local_files(&self, metric: MetricKind) -> Option<MetricPayload> {
        let snapshot = self.attempt(
            metric,
            &self.files_health,
            self.sources.files.read_latest(metric),
        )?;
        Some(self.with_age_warning(MetricPayload::from_snapshot(
            metric,
            DataSource::LocalCsv,
            snapshot,
        )))
    }

    fn try_database(&self, metric: MetricKind) -> Option<MetricPayload> {
        let snapshot = self.attempt(
            metric,
            &self.database_health,
            self.sources.database.query_latest(metric),
        )?;
        Some(self.with_age_warning(MetricPayload::from_snapshot(
            metric,
            DataSource::LocalDatabase,
            snapshot,
        )))
    }

    /// Validate a local provider's answer and record the outcome.
    fn attempt(
        &self,
        metric: MetricKind,
        health: &ProviderHealth,
        result: Result<Option<Snapshot>, ProviderError>,
    ) -> Option<Snapshot> {
        let checked = result.and_then(|found| match found {
            Some(snapshot) => metric.validate(&snapshot.fields).map(|()| Some(snapshot)),
            None => Ok(None),
        });

        match checked {
            Ok(Some(snapshot)) => {
                health.record_success();
                Some(snapshot)
            }
            Ok(None) => {
                debug!(%metric, provider = health.name(), "no local data");
                None
            }
            Err(e) => {
                health.record_failure();
                warn!(%metric, provider = health.name(), error = %e, "local source failed");
                None
            }
        }
    }

    fn try_last_good(&self, metric: MetricKind) -> Option<MetricPayload> {
        let mut payload = self.cache.peek_stale(&last_good_key(metric))?;
        payload.data_source = DataSource::CachedStale;
        let warning = match payload.age().and_then(|age| age.to_std().ok()) {
            Some(age) => format!(
                "Showing cached data from {} ago; the remote and local sources are unavailable",
                describe_age(age)
            ),
            None => "Showing cached data; the remote and local sources are unavailable".into(),
        };
        info!(%metric, "serving last known good payload");
        Some(payload.with_warning(warning))
    }

    fn with_age_warning(&self, payload: MetricPayload) -> MetricPayload {
        match payload.age().and_then(|age| age.to_std().ok()) {
            Some(age) if age > self.settings.freshness_threshold => {
                let warning = format!(
                    "Local data is {} old; the remote may have stopped updating",
                    describe_age(age)
                );
                payload.with_warning(warning)
            }
            _ => payload,
        }
    }

    /// Probe the remote and summarize every source.
    pub fn status(&self) -> FallbackStatus {
        let reachable = self.sources.connectivity.is_reachable();
        self.remote_health.set_reachable(reachable);

        let file_count = self.sources.files.file_count();
        let database_available = self.sources.database.is_available();
        self.files_health.set_reachable(file_count > 0);
        self.database_health.set_reachable(database_available);

        let providers = [&self.remote_health, &self.files_health, &self.database_health]
            .into_iter()
            .map(|h| (h.name().to_string(), h.snapshot()))
            .collect();

        FallbackStatus {
            remote_reachable: reachable,
            fallback_needed: self.is_fallback_needed(reachable),
            newest_export_age_secs: self.exports_age().map(|age| age.as_secs()),
            local_file_count: file_count,
            local_files_available: file_count > 0,
            database_available,
            freshness_threshold_secs: self.settings.freshness_threshold.as_secs(),
            providers,
            cache: self.cache.stats(),
        }
    }
}

fn last_good_key(metric: MetricKind) -> String {
    format!("last_good:{metric}")
}

/// Coarse human-readable age: `2d 3h`, `5h 12m`, `7m`, `42s`.
pub fn describe_age(age: Duration) -> String {
    let secs = age.as_secs();
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}
