//! Stale-while-revalidate on top of [`CacheEngine`].
//!
//! A hit is answered from the store at once. When the caller allows
//! revalidation, a background task re-runs the fetcher and overwrites the
//! entry, so the next reader sees fresher data. At most one refresh per key
//! is in flight; background outcomes are only logged.
//!
//! Refresh writes race with other writers of the same key. The store keeps
//! whichever write lands last.

use crate::backend::CacheBackend;
use crate::engine::{CacheEngine, SetOptions};
use crate::serialization::{CacheCodec, PostcardCodec};
use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Options for [`SwrCache::get_or_fetch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwrOptions {
    pub ttl_seconds: u64,
    /// `0` disables background refresh on hits.
    pub stale_while_revalidate_seconds: u64,
    pub tags: Vec<String>,
}

impl SwrOptions {
    pub fn new(ttl_seconds: u64) -> Self {
        SwrOptions {
            ttl_seconds,
            stale_while_revalidate_seconds: 0,
            tags: Vec::new(),
        }
    }

    pub fn revalidate(mut self, seconds: u64) -> Self {
        self.stale_while_revalidate_seconds = seconds;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn set_options(&self) -> SetOptions {
        SetOptions::new(self.ttl_seconds).with_tags(self.tags.iter().cloned())
    }
}

/// Removes the key from the in-flight set even if the refresh panics or is
/// dropped.
struct InFlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

pub struct SwrCache<B: CacheBackend, C: CacheCodec = PostcardCodec> {
    engine: Arc<CacheEngine<B, C>>,
    tracker: TaskTracker,
    in_flight: Arc<DashMap<String, ()>>,
    accepting: Arc<AtomicBool>,
}

impl<B: CacheBackend, C: CacheCodec> Clone for SwrCache<B, C> {
    fn clone(&self) -> Self {
        SwrCache {
            engine: Arc::clone(&self.engine),
            tracker: self.tracker.clone(),
            in_flight: Arc::clone(&self.in_flight),
            accepting: Arc::clone(&self.accepting),
        }
    }
}

impl<B: CacheBackend, C: CacheCodec> SwrCache<B, C> {
    pub fn new(engine: Arc<CacheEngine<B, C>>) -> Self {
        SwrCache {
            engine,
            tracker: TaskTracker::new(),
            in_flight: Arc::new(DashMap::new()),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine<B, C>> {
        &self.engine
    }

    /// Refreshes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cached value for `key`, or the fetcher's result.
    ///
    /// On a miss the fetcher runs inline and its value is stored. If it
    /// fails, a value that appeared in the store meanwhile is served instead;
    /// failing that, the fetcher is invoked once more and its outcome is
    /// returned as is.
    ///
    /// # Errors
    /// Returns the fetcher's error from that final invocation.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: &SwrOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if let Some(value) = self.engine.get::<T>(key).await {
            if options.stale_while_revalidate_seconds > 0 {
                self.spawn_refresh(key, fetcher, options);
            }
            return Ok(value);
        }

        match fetcher().await {
            Ok(value) => {
                self.engine.set(key, &value, &options.set_options()).await;
                Ok(value)
            }
            Err(e) => {
                warn!("Fetch for {} failed: {}", key, e);
                if let Some(stale) = self.engine.get::<T>(key).await {
                    warn!("Serving cached value for {} after fetch failure", key);
                    return Ok(stale);
                }
                debug!("No cached value for {}, retrying fetch once", key);
                fetcher().await
            }
        }
    }

    fn spawn_refresh<T, E, F, Fut>(&self, key: &str, fetcher: F, options: &SwrOptions)
    where
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            debug!("Refresh for {} skipped, shutting down", key);
            return;
        }

        let guard = match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!("Refresh for {} already in flight", key);
                return;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.to_string(),
                }
            }
        };

        let engine = Arc::clone(&self.engine);
        let set_options = options.set_options();
        let key = key.to_string();

        self.tracker.spawn(async move {
            let _guard = guard;
            let refresh = async {
                match fetcher().await {
                    Ok(value) => {
                        if engine.set(&key, &value, &set_options).await {
                            debug!("Background refresh of {} stored", key);
                        }
                    }
                    Err(e) => warn!("Background refresh of {} failed: {}", key, e),
                }
            };
            if AssertUnwindSafe(refresh).catch_unwind().await.is_err() {
                error!("Background refresh of {} panicked", key);
            }
        });
    }

    /// Stop scheduling refreshes and wait up to `grace` for running ones.
    ///
    /// Returns `true` if all finished in time. Refreshes still running after
    /// `grace` are no longer waited for.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::Release);
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("SWR shutdown complete");
                true
            }
            Err(_) => {
                warn!(
                    "SWR shutdown abandoned {} in-flight refreshes after {:?}",
                    self.tracker.len(),
                    grace
                );
                false
            }
        }
    }
}
