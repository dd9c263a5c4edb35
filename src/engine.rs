//! Cache engine - typed get/set/invalidate over a shared store.

use crate::backend::{escape_glob, CacheBackend};
use crate::config::{CacheConfig, DataCategory, TtlConfig};
use crate::entry::{now_millis, CacheEntry};
use crate::error::Result;
use crate::observability::{CacheMetrics, CacheMetricsSnapshot, CacheStats, NoOpMetrics};
use crate::serialization::compression::{compress, decompress};
use crate::serialization::{deserialize_from_cache, serialize_for_cache, CacheCodec, PostcardCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Keys requested per `scan` page during prefix invalidation.
const SCAN_PAGE_SIZE: usize = 100;

/// Per-write options for [`CacheEngine::set`].
///
/// # Example
///
/// ```ignore
/// use resilient_cache::{SetOptions, config::{DataCategory, TtlConfig}};
///
/// let options = SetOptions::new(300).tag("vehicles").tag("branch:leeds");
/// let options = SetOptions::for_category(&TtlConfig::default(), DataCategory::Vehicle);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetOptions {
    /// Store expiry in seconds; `0` keeps the entry until invalidated.
    pub ttl_seconds: u64,
    /// Tags the entry can be invalidated by.
    pub tags: Vec<String>,
    /// Allow gzip for payloads above the engine's threshold.
    pub compress: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        SetOptions {
            ttl_seconds: 300,
            tags: Vec::new(),
            compress: true,
        }
    }
}

impl SetOptions {
    pub fn new(ttl_seconds: u64) -> Self {
        SetOptions {
            ttl_seconds,
            ..SetOptions::default()
        }
    }

    /// TTL taken from the category's configured value.
    pub fn for_category(ttls: &TtlConfig, category: DataCategory) -> Self {
        Self::new(ttls.for_category(category))
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }
}

/// Typed cache over a [`CacheBackend`].
///
/// Store failures never reach the caller: reads degrade to a miss and writes
/// or invalidations to a no-op, with the failure logged and counted in
/// [`metrics`](Self::metrics).
///
/// Values live at `<namespace>:<key>`; tag indices at `tag:<tag>`.
///
/// # Example
///
/// ```ignore
/// use resilient_cache::{CacheEngine, SetOptions, backend::InMemoryBackend, config::CacheConfig};
///
/// let engine = CacheEngine::new(InMemoryBackend::new(), CacheConfig::default());
/// engine.set("vehicles:list:p1", &listings, &SetOptions::new(300).tag("vehicles")).await;
/// let cached: Option<Vec<Listing>> = engine.get("vehicles:list:p1").await;
/// engine.invalidate_by_tag("vehicles").await;
/// ```
pub struct CacheEngine<B: CacheBackend, C: CacheCodec = PostcardCodec> {
    backend: B,
    codec: C,
    config: CacheConfig,
    stats: CacheStats,
    metrics: Box<dyn CacheMetrics>,
}

impl<B: CacheBackend> CacheEngine<B> {
    /// Create an engine using the postcard codec.
    pub fn new(backend: B, config: CacheConfig) -> Self {
        Self::with_codec(backend, PostcardCodec, config)
    }
}

impl<B: CacheBackend, C: CacheCodec> CacheEngine<B, C> {
    pub fn with_codec(backend: B, codec: C, config: CacheConfig) -> Self {
        info!(
            "Cache engine ready (namespace: {}, codec: {})",
            config.namespace,
            codec.name()
        );
        CacheEngine {
            backend,
            codec,
            stats: CacheStats::new(config.max_response_samples),
            config,
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store key for a logical key.
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    /// Store key of a tag index.
    pub fn tag_key(tag: &str) -> String {
        format!("tag:{}", tag)
    }

    /// Read a value. Misses, undecodable entries and store failures all
    /// return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let timer = Instant::now();
        let store_key = self.store_key(key);

        let bytes = match self.backend.get(&store_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.miss(timer.elapsed());
                self.metrics.record_miss(&store_key, timer.elapsed());
                return None;
            }
            Err(e) => {
                error!("Cache GET {} failed: {}", store_key, e);
                self.fail(&store_key, &e.to_string());
                self.stats.miss(timer.elapsed());
                return None;
            }
        };

        match self.decode_entry(&bytes) {
            Ok(value) => {
                self.stats.hit(timer.elapsed());
                self.metrics.record_hit(&store_key, timer.elapsed());
                Some(value)
            }
            Err(e) => {
                warn!("Cache entry {} could not be decoded: {}", store_key, e);
                self.fail(&store_key, &e.to_string());
                self.stats.miss(timer.elapsed());
                None
            }
        }
    }

    /// Read the raw entry, envelope unwrapped but payload still encoded.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let store_key = self.store_key(key);
        match self.backend.get(&store_key).await {
            Ok(Some(bytes)) => deserialize_from_cache(&bytes)
                .map_err(|e| debug!("Cache entry {} unreadable: {}", store_key, e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                error!("Cache GET {} failed: {}", store_key, e);
                None
            }
        }
    }

    /// Bulk read. The result has one slot per requested key.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> Vec<Option<T>> {
        let timer = Instant::now();
        let store_keys: Vec<String> = keys.iter().map(|k| self.store_key(k)).collect();
        let refs: Vec<&str> = store_keys.iter().map(String::as_str).collect();

        let raw = match self.backend.mget(&refs).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Cache MGET of {} keys failed: {}", keys.len(), e);
                self.fail(&self.config.namespace, &e.to_string());
                return keys.iter().map(|_| None).collect();
            }
        };

        let values: Vec<Option<T>> = raw
            .into_iter()
            .zip(&store_keys)
            .map(|(bytes, store_key)| {
                let bytes = bytes?;
                match self.decode_entry(&bytes) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Cache entry {} could not be decoded: {}", store_key, e);
                        self.fail(store_key, &e.to_string());
                        None
                    }
                }
            })
            .collect();

        for value in &values {
            match value {
                Some(_) => self.stats.hit(timer.elapsed()),
                None => self.stats.miss(timer.elapsed()),
            }
        }
        debug!("Cache MGET {} keys in {:?}", keys.len(), timer.elapsed());
        values
    }

    /// Write a value and index it under its tags.
    ///
    /// Returns whether the value itself was stored. Tag index failures are
    /// logged and counted but do not undo the write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &SetOptions) -> bool {
        let timer = Instant::now();
        let store_key = self.store_key(key);

        let bytes = match self.encode_entry(&store_key, value, options) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Cache SET {} failed to encode: {}", store_key, e);
                self.fail(&store_key, &e.to_string());
                return false;
            }
        };

        let ttl = (options.ttl_seconds > 0).then(|| Duration::from_secs(options.ttl_seconds));
        if let Err(e) = self.backend.set(&store_key, bytes, ttl).await {
            error!("Cache SET {} failed: {}", store_key, e);
            self.fail(&store_key, &e.to_string());
            return false;
        }

        for tag in &options.tags {
            if let Err(e) = self.index_tag(tag, &store_key, options.ttl_seconds).await {
                error!("Cache tag index {} for {} failed: {}", tag, store_key, e);
                self.fail(&store_key, &e.to_string());
            }
        }

        self.stats.write(timer.elapsed());
        self.metrics.record_set(&store_key, timer.elapsed());
        true
    }

    async fn index_tag(&self, tag: &str, store_key: &str, ttl_seconds: u64) -> Result<()> {
        let tag_key = Self::tag_key(tag);
        // The index must outlive its longest-lived member; an entry without TTL pins it.
        let index_ttl = (ttl_seconds > 0).then(|| {
            Duration::from_secs(ttl_seconds.saturating_add(self.config.tag_index_margin))
        });
        self.backend
            .sadd_with_ttl(&tag_key, store_key, index_ttl)
            .await
    }

    /// Delete one entry.
    pub async fn invalidate(&self, key: &str) {
        let store_key = self.store_key(key);
        match self.backend.delete(&store_key).await {
            Ok(()) => {
                self.stats.invalidated(1);
                self.metrics.record_invalidation(&store_key, 1);
                debug!("Cache INVALIDATE {}", store_key);
            }
            Err(e) => {
                error!("Cache INVALIDATE {} failed: {}", store_key, e);
                self.fail(&store_key, &e.to_string());
            }
        }
    }

    /// Delete every entry tagged `tag` together with the tag index.
    ///
    /// Returns the number of entries removed, not counting the index.
    pub async fn invalidate_by_tag(&self, tag: &str) -> u64 {
        let tag_key = Self::tag_key(tag);

        let members = match self.backend.smembers(&tag_key).await {
            Ok(members) => members,
            Err(e) => {
                error!("Cache tag lookup {} failed: {}", tag_key, e);
                self.fail(&tag_key, &e.to_string());
                return 0;
            }
        };

        let mut keys: Vec<&str> = members.iter().map(String::as_str).collect();
        keys.push(&tag_key);

        let removed = match self.backend.mdelete(&keys).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Cache tag invalidation {} failed: {}", tag_key, e);
                self.fail(&tag_key, &e.to_string());
                return 0;
            }
        };

        // An index with members exists, so it is part of the deleted count.
        let entries = if members.is_empty() {
            0
        } else {
            removed.saturating_sub(1)
        };

        self.stats.invalidated(entries);
        self.metrics.record_invalidation(&tag_key, entries);
        info!(
            "Cache invalidated {} entries by tag {} ({} indexed)",
            entries,
            tag,
            members.len()
        );
        entries
    }

    /// Delete every entry whose logical key starts with `prefix`.
    ///
    /// Walks the keyspace with `scan` one page at a time. Returns the number
    /// of entries removed; on a store failure, the count so far.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> u64 {
        let store_prefix = self.store_key(prefix);
        let pattern = format!("{}*", escape_glob(&store_prefix));
        let mut cursor = 0;
        let mut removed = 0;

        loop {
            let (next, keys) = match self.backend.scan(&pattern, cursor, SCAN_PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => {
                    error!("Cache SCAN {} failed: {}", pattern, e);
                    self.fail(&pattern, &e.to_string());
                    break;
                }
            };

            let refs: Vec<&str> = keys
                .iter()
                .map(String::as_str)
                .filter(|key| key.starts_with(&store_prefix))
                .collect();
            if !refs.is_empty() {
                match self.backend.mdelete(&refs).await {
                    Ok(count) => removed += count,
                    Err(e) => {
                        error!("Cache prefix delete for {} failed: {}", pattern, e);
                        self.fail(&pattern, &e.to_string());
                        break;
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        self.stats.invalidated(removed);
        self.metrics.record_invalidation(&pattern, removed);
        info!("Cache invalidated {} entries matching {}", removed, pattern);
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        let store_key = self.store_key(key);
        match self.backend.exists(&store_key).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Cache EXISTS {} failed: {}", store_key, e);
                self.fail(&store_key, &e.to_string());
                false
            }
        }
    }

    /// Ping the store.
    pub async fn health_check(&self) -> bool {
        match self.backend.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Cache store health check failed: {}", e);
                false
            }
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.stats.reset();
    }

    fn fail(&self, key: &str, error: &str) {
        self.stats.error();
        self.metrics.record_error(key, error);
    }

    fn encode_entry<T: Serialize>(
        &self,
        store_key: &str,
        value: &T,
        options: &SetOptions,
    ) -> Result<Vec<u8>> {
        let encoded = self.codec.encode(value)?;
        let size_bytes = encoded.len() as u64;
        let compressed = options.compress
            && self.config.compression_enabled
            && encoded.len() > self.config.compression_threshold;

        let payload = if compressed {
            let packed = compress(&encoded)?;
            debug!(
                "Cache SET {} compressed {} -> {} bytes",
                store_key,
                encoded.len(),
                packed.len()
            );
            packed
        } else {
            encoded
        };

        let entry = CacheEntry {
            key: store_key.to_string(),
            payload,
            created_at: now_millis(),
            ttl_seconds: options.ttl_seconds,
            compressed,
            size_bytes,
            tags: options.tags.clone(),
        };
        serialize_for_cache(&entry)
    }

    fn decode_entry<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let entry: CacheEntry = deserialize_from_cache(bytes)?;
        if entry.compressed {
            self.codec.decode(&decompress(&entry.payload)?)
        } else {
            self.codec.decode(&entry.payload)
        }
    }
}
