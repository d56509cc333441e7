//! LRU + TTL cache with transparent gzip compression.
//!
//! One `Mutex` guards the entry map, the recency index, and the counters, so
//! every operation is atomic with respect to the others. Recency is an
//! ever-increasing access counter: each hit or write stamps the entry with the
//! next value, and the smallest stamp in `recency` is the LRU victim.
//!
//! Values above `compression_threshold` bytes (as serde_json) are gzipped and
//! decoded again on read. Compression that does not shrink the value is
//! discarded and the value is kept as-is.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Construction-time cache parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub max_size: usize,
    /// Serialized size in bytes above which values are compressed.
    pub compression_threshold: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            max_size: 1000,
            compression_threshold: 1024,
        }
    }
}

/// Counters and occupancy reported by [`TieredCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    /// Stored entries currently held compressed.
    pub compressed_count: usize,
    pub default_ttl_secs: u64,
}

#[derive(Debug, Error)]
enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
}

enum StoredValue<V> {
    Plain(V),
    Compressed(Vec<u8>),
}

impl<V: Serialize + DeserializeOwned + Clone> StoredValue<V> {
    fn encode(key: &str, value: V, threshold: usize) -> Self {
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable, storing uncompressed");
                return StoredValue::Plain(value);
            }
        };
        if bytes.len() <= threshold {
            return StoredValue::Plain(value);
        }

        match gzip(&bytes) {
            Ok(compressed) if compressed.len() < bytes.len() => {
                debug!(key, raw = bytes.len(), compressed = compressed.len(), "compressed cache value");
                StoredValue::Compressed(compressed)
            }
            Ok(_) => StoredValue::Plain(value),
            Err(e) => {
                warn!(key, error = %e, "gzip failed, storing uncompressed");
                StoredValue::Plain(value)
            }
        }
    }

    fn decode(&self) -> Result<V, CodecError> {
        match self {
            StoredValue::Plain(value) => Ok(value.clone()),
            StoredValue::Compressed(bytes) => {
                let mut raw = Vec::new();
                GzDecoder::new(bytes.as_slice()).read_to_end(&mut raw)?;
                Ok(serde_json::from_slice(&raw)?)
            }
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self, StoredValue::Compressed(_))
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

struct CacheEntry<V> {
    value: StoredValue<V>,
    /// `None` when `now + ttl` is not representable.
    expires_at: Option<Instant>,
    order: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    next_order: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_order: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn next_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    fn touch(&mut self, key: &str) {
        let order = self.next_order();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.order);
            entry.order = order;
            self.recency.insert(order, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.order);
        Some(entry)
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "evicted least recently used cache entry");
        }
    }
}

enum Lookup<V> {
    Missing,
    Expired,
    Hit(V),
    Corrupt(CodecError),
}

/// Thread-safe, size-bounded cache with per-entry expiry.
pub struct TieredCache<V> {
    settings: CacheSettings,
    inner: Mutex<Inner<V>>,
}

impl<V> TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn new(settings: CacheSettings) -> Self {
        let settings = CacheSettings {
            max_size: settings.max_size.max(1),
            ..settings
        };
        Self {
            settings,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`, refreshing its recency.
    ///
    /// Expired entries are dropped here and count as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        let lookup = match inner.entries.get(key) {
            None => Lookup::Missing,
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => match entry.value.decode() {
                Ok(value) => Lookup::Hit(value),
                Err(e) => Lookup::Corrupt(e),
            },
        };

        match lookup {
            Lookup::Hit(value) => {
                inner.touch(key);
                inner.hits += 1;
                Some(value)
            }
            Lookup::Missing => {
                inner.misses += 1;
                None
            }
            Lookup::Expired => {
                inner.remove(key);
                inner.misses += 1;
                None
            }
            Lookup::Corrupt(e) => {
                warn!(key, error = %e, "dropping undecodable cache entry");
                inner.remove(key);
                inner.misses += 1;
                None
            }
        }
    }

    /// Value for `key` even if expired. Counters and recency are untouched.
    pub fn peek_stale(&self, key: &str) -> Option<V> {
        let inner = self.lock();
        let entry = inner.entries.get(key)?;
        match entry.value.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "stale cache entry undecodable");
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let value = StoredValue::encode(&key, value, self.settings.compression_threshold);
        let now = Instant::now();
        let expires_at = now.checked_add(ttl);

        let mut inner = self.lock();
        if inner.remove(&key).is_none() && inner.entries.len() >= self.settings.max_size {
            inner.evict_lru();
        }
        let order = inner.next_order();
        inner.recency.insert(order, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                order,
            },
        );
    }

    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.settings.default_ttl);
    }

    /// Remove `key` if present.
    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Remove every key containing `pattern`, returning how many went.
    pub fn delete_matching(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    /// Drop all entries. Hit, miss and eviction counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "swept expired cache entries");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.settings.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            evictions: inner.evictions,
            compressed_count: inner
                .entries
                .values()
                .filter(|e| e.value.is_compressed())
                .count(),
            default_ttl_secs: self.settings.default_ttl.as_secs(),
        }
    }
}

impl<V> Default for TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}
