//! # resilient-cache
//!
//! Caching and resilience core for services that sit in front of slow or
//! unreliable dependencies.
//!
//! ## Features
//!
//! - **Typed cache engine:** generic get/set over a shared store with TTLs,
//!   tag-based and prefix-based invalidation, gzip for large payloads and
//!   hit/miss metrics
//! - **Stale-while-revalidate:** serve cached values at once and refresh them
//!   in tracked background tasks, one per key
//! - **Circuit breakers:** per-service closed/open/half-open guards
//! - **Retries and timeouts:** exponential backoff with jitter, per-class
//!   deadlines
//! - **Fallbacks and error classification:** last-known-good results and a
//!   single classified [`AppError`](resilience::AppError) for every failure
//! - **Backend agnostic:** in-memory (default) and Redis (`redis` feature)
//!
//! ## Quick Start
//!
//! ```ignore
//! use resilient_cache::{
//!     backend::InMemoryBackend, config::Settings, CacheEngine, SetOptions, SwrCache, SwrOptions,
//! };
//! use std::sync::Arc;
//!
//! let settings = Settings::from_env()?;
//! let engine = Arc::new(CacheEngine::new(InMemoryBackend::new(), settings.cache.clone()));
//!
//! // Plain cache access
//! engine.set("vehicles:list:p1", &page, &SetOptions::new(300).tag("vehicles")).await;
//! let page: Option<Page> = engine.get("vehicles:list:p1").await;
//! engine.invalidate_by_tag("vehicles").await;
//!
//! // Stale-while-revalidate
//! let swr = SwrCache::new(Arc::clone(&engine));
//! let featured = swr
//!     .get_or_fetch("vehicles:featured", || repo.featured(), &SwrOptions::new(600).revalidate(60))
//!     .await?;
//! ```
//!
//! ### Calling remote services
//!
//! ```ignore
//! use resilient_cache::resilience::{ResilienceManager, ResilienceOptions};
//!
//! let resilience = ResilienceManager::new(settings.resilience.clone());
//! let valuation = resilience
//!     .execute_with_resilience(
//!         || pricing.valuation(&vrm),
//!         ResilienceOptions::new("pricing").fallback_cache_key(format!("valuation:{}", vrm)),
//!     )
//!     .await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod serialization;
pub mod swr;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::{CacheConfig, DataCategory, Settings, TtlConfig};
pub use engine::{CacheEngine, SetOptions};
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use resilience::{AppError, ResilienceManager, ResilienceOptions};
pub use swr::{SwrCache, SwrOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
