//! In-memory store backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Automatically handles TTL expiration on access. Supports plain values and
//! string sets so tag indices work the same way they do against Redis.

use super::{glob_match, CacheBackend};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

enum StoredValue {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

/// In-memory store entry with optional expiration.
struct StoreEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoreEntry { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::BackendError(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

/// Thread-safe async in-memory store backend.
///
/// Uses DashMap for lock-free concurrent access with fine-grained per-key sharding.
/// No async locks required - operations are non-blocking.
/// Expired entries are dropped lazily when touched.
///
/// # Example
///
/// ```no_run
/// use resilient_cache::backend::{InMemoryBackend, CacheBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("cache:key1", b"value".to_vec(), None).await?;
///     assert!(backend.get("cache:key1").await?.is_some());
///
///     backend
///         .sadd_with_ttl("tag:vehicles", "cache:key1", Some(Duration::from_secs(600)))
///         .await?;
///     assert_eq!(backend.smembers("tag:vehicles").await?, vec!["cache:key1"]);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoreEntry>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Drop the key if it has expired. Returns true if it was live.
    fn evict_if_expired(&self, key: &str) -> bool {
        self.store
            .remove_if(key, |_, entry| entry.is_expired())
            .is_none()
            && self.store.contains_key(key)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return match &entry.value {
                    StoredValue::Bytes(data) => {
                        debug!("InMemory GET {} -> HIT", key);
                        Ok(Some(data.clone()))
                    }
                    StoredValue::Set(_) => Err(wrong_type(key)),
                };
            }
        }

        // Remove expired entry if it exists
        self.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = StoreEntry::new(StoredValue::Bytes(value), ttl);
        self.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("InMemory DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.evict_if_expired(key))
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let results: Vec<Option<Vec<u8>>> = keys
            .iter()
            .map(|k| match self.store.get(*k) {
                Some(entry) if !entry.is_expired() => match &entry.value {
                    StoredValue::Bytes(data) => Some(data.clone()),
                    // MGET yields nil for non-string keys
                    StoredValue::Set(_) => None,
                },
                _ => None,
            })
            .collect();

        debug!("InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.store.remove(*key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }

        debug!("InMemory MDELETE {} keys ({} removed)", keys.len(), removed);
        Ok(removed)
    }

    async fn sadd_with_ttl(
        &self,
        set_key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let wanted = ttl.map(|d| Instant::now() + d);
        let fresh = || StoreEntry {
            value: StoredValue::Set(HashSet::new()),
            expires_at: wanted,
        };

        // Entry guard holds the shard lock, so the add and the expiry update are atomic.
        let mut entry = self.store.entry(set_key.to_string()).or_insert_with(fresh);
        if entry.is_expired() {
            *entry = fresh();
        }

        let StoredValue::Set(members) = &mut entry.value else {
            return Err(wrong_type(set_key));
        };
        members.insert(member.to_string());

        entry.expires_at = match (entry.expires_at, wanted) {
            (None, _) | (_, None) => None,
            (Some(current), Some(wanted)) => Some(current.max(wanted)),
        };

        debug!("InMemory SADD {} {} (ttl {:?})", set_key, member, ttl);
        Ok(())
    }

    async fn smembers(&self, set_key: &str) -> Result<Vec<String>> {
        if !self.evict_if_expired(set_key) {
            return Ok(Vec::new());
        }

        match self.store.get(set_key) {
            Some(entry) => match &entry.value {
                StoredValue::Set(members) => Ok(members.iter().cloned().collect()),
                StoredValue::Bytes(_) => Err(wrong_type(set_key)),
            },
            None => Ok(Vec::new()),
        }
    }

    // The whole keyspace is returned in one page; COUNT is only a hint.
    async fn scan(&self, pattern: &str, _cursor: u64, _count: usize) -> Result<(u64, Vec<String>)> {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| !entry.is_expired() && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        debug!("InMemory SCAN {} -> {} keys", pattern, keys.len());
        Ok((0, keys))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn clear_all(&self) -> Result<()> {
        self.store.clear();
        warn!("InMemory CLEAR_ALL executed - all keys removed!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_backend_set_get() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");

        let result = backend.get("key1").await.expect("Failed to get");
        assert_eq!(result, Some(b"value1".to_vec()));
    }

    #[tokio::test]
    async fn test_inmemory_backend_miss() {
        let backend = InMemoryBackend::new();

        let result = backend.get("nonexistent").await.expect("Failed to get");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_inmemory_backend_ttl_expiration() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), Some(Duration::from_millis(100)))
            .await
            .expect("Failed to set");

        assert!(backend.get("key1").await.expect("Failed to get").is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(backend.get("key1").await.expect("Failed to get").is_none());
        assert!(!backend.exists("key1").await.expect("Failed to check"));
    }

    #[tokio::test]
    async fn test_inmemory_backend_mget() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .set("key2", b"value2".to_vec(), None)
            .await
            .expect("Failed to set");

        let results = backend
            .mget(&["key1", "key2", "key3"])
            .await
            .expect("Failed to mget");

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Some(b"value1".to_vec()));
        assert_eq!(results[1], Some(b"value2".to_vec()));
        assert_eq!(results[2], None);
    }

    #[tokio::test]
    async fn test_inmemory_backend_mdelete_counts_existing_keys() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .set("key2", b"value2".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .set("key3", b"value3".to_vec(), None)
            .await
            .expect("Failed to set");

        let removed = backend
            .mdelete(&["key1", "key2", "missing"])
            .await
            .expect("Failed to mdelete");

        assert_eq!(removed, 2);
        assert!(!backend.exists("key1").await.expect("Failed to check"));
        assert!(backend.get("key3").await.expect("Failed to get").is_some());
    }

    #[tokio::test]
    async fn test_inmemory_backend_sets() {
        let backend = InMemoryBackend::new();

        for member in ["k1", "k2", "k1"] {
            backend
                .sadd_with_ttl("tag:a", member, None)
                .await
                .expect("sadd");
        }

        let mut members = backend.smembers("tag:a").await.expect("smembers");
        members.sort();
        assert_eq!(members, vec!["k1".to_string(), "k2".to_string()]);

        assert!(backend.smembers("tag:none").await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_backend_wrong_type() {
        let backend = InMemoryBackend::new();

        backend.set("plain", b"v".to_vec(), None).await.expect("set");
        assert!(backend.sadd_with_ttl("plain", "m", None).await.is_err());

        backend.sadd_with_ttl("set", "m", None).await.expect("sadd");
        assert!(backend.get("set").await.is_err());
    }

    #[tokio::test]
    async fn test_inmemory_backend_set_ttl_applies_to_new_set() {
        let backend = InMemoryBackend::new();

        backend
            .sadd_with_ttl("tag:short", "k", Some(Duration::from_millis(50)))
            .await
            .expect("sadd");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(backend.smembers("tag:short").await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_backend_set_ttl_never_shrinks() {
        let backend = InMemoryBackend::new();

        backend
            .sadd_with_ttl("tag:mixed", "long", Some(Duration::from_millis(300)))
            .await
            .expect("sadd");
        backend
            .sadd_with_ttl("tag:mixed", "short", Some(Duration::from_millis(20)))
            .await
            .expect("sadd");

        tokio::time::sleep(Duration::from_millis(80)).await;
        let mut members = backend.smembers("tag:mixed").await.expect("smembers");
        members.sort();
        assert_eq!(members, vec!["long".to_string(), "short".to_string()]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(backend.smembers("tag:mixed").await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_backend_persistent_set_stays_persistent() {
        let backend = InMemoryBackend::new();

        backend
            .sadd_with_ttl("tag:forever", "pinned", None)
            .await
            .expect("sadd");
        backend
            .sadd_with_ttl("tag:forever", "brief", Some(Duration::from_millis(20)))
            .await
            .expect("sadd");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.smembers("tag:forever").await.expect("smembers").len(), 2);

        // A later member without expiry also clears an existing one.
        backend
            .sadd_with_ttl("tag:later", "brief", Some(Duration::from_millis(20)))
            .await
            .expect("sadd");
        backend
            .sadd_with_ttl("tag:later", "pinned", None)
            .await
            .expect("sadd");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.smembers("tag:later").await.expect("smembers").len(), 2);
    }

    #[tokio::test]
    async fn test_inmemory_backend_scan() {
        let backend = InMemoryBackend::new();

        for key in ["cache:vehicles:1", "cache:vehicles:2", "cache:users:1"] {
            backend.set(key, b"v".to_vec(), None).await.expect("set");
        }

        let (cursor, mut keys) = backend
            .scan("cache:vehicles:*", 0, 100)
            .await
            .expect("scan");
        keys.sort();

        assert_eq!(cursor, 0);
        assert_eq!(keys, vec!["cache:vehicles:1", "cache:vehicles:2"]);
    }

    #[tokio::test]
    async fn test_inmemory_backend_clear_all() {
        let backend = InMemoryBackend::new();

        backend
            .set("key1", b"value1".to_vec(), None)
            .await
            .expect("Failed to set");
        backend
            .sadd_with_ttl("tag:x", "key1", None)
            .await
            .expect("sadd");

        backend.clear_all().await.expect("Failed to clear");

        assert!(!backend.exists("key1").await.expect("Failed to check"));
        assert!(backend.smembers("tag:x").await.expect("smembers").is_empty());
        let (_, keys) = backend.scan("*", 0, 100).await.expect("scan");
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_backend_thread_safe() {
        let backend = InMemoryBackend::new();
        let mut handles = vec![];

        for i in 0..10 {
            let b = backend.clone();
            let handle = tokio::spawn(async move {
                let key = format!("key_{}", i);
                b.set(&key, format!("value_{}", i).into_bytes(), None)
                    .await
                    .expect("Failed to set");
                b.sadd_with_ttl("tag:all", &key, Some(Duration::from_secs(60)))
                    .await
                    .expect("Failed to sadd");
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }

        assert_eq!(backend.smembers("tag:all").await.expect("smembers").len(), 10);
    }
}
