//! In-process store of last-known-good results.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_FALLBACK_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Entries older than this are never served and are swept on write.
    pub ttl: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            ttl: DEFAULT_FALLBACK_TTL,
        }
    }
}

struct FallbackEntry {
    data: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
}

/// Type-erased map from fallback key to the last successful result.
///
/// Values are cloned in on success and cloned out on failure; a lookup with
/// a different type than the one stored is a miss.
#[derive(Clone)]
pub struct FallbackCache {
    entries: Arc<DashMap<String, FallbackEntry>>,
    config: FallbackConfig,
}

impl FallbackCache {
    pub fn new(config: FallbackConfig) -> Self {
        FallbackCache {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn store<T>(&self, key: &str, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.sweep();
        self.entries.insert(
            key.to_string(),
            FallbackEntry {
                data: Arc::new(value),
                stored_at: Instant::now(),
            },
        );
    }

    /// Fresh value under `key`, if one of type `T` exists.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() >= self.config.ttl {
            return None;
        }
        entry.data.downcast_ref::<T>().cloned()
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FallbackCache {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}
