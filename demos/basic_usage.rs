//! Basic usage: a dealership stock feed behind the cache and the resilience layer.
//!
//! Run with: RUST_LOG=debug cargo run --example basic_usage

use resilient_cache::backend::InMemoryBackend;
use resilient_cache::resilience::ServiceError;
use resilient_cache::{
    CacheEngine, DataCategory, ResilienceManager, ResilienceOptions, SetOptions, Settings,
    SwrCache, SwrOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Vehicle {
    id: u32,
    make: String,
    model: String,
    price_pence: u64,
}

/// Simulated upstream stock feed that fails every third call.
struct StockFeed {
    calls: AtomicU32,
}

impl StockFeed {
    async fn fetch(&self) -> Result<Vec<Vehicle>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  [FEED] call #{}", call);
        tokio::time::sleep(Duration::from_millis(50)).await;

        if call % 3 == 0 {
            return Err(ServiceError::Http {
                status: 503,
                message: "stock feed unavailable".to_string(),
            });
        }

        Ok(vec![
            Vehicle {
                id: 1,
                make: "Ford".to_string(),
                model: "Fiesta".to_string(),
                price_pence: 895_000,
            },
            Vehicle {
                id: 2,
                make: "Skoda".to_string(),
                model: "Octavia".to_string(),
                price_pence: 1_249_500,
            },
        ])
    }
}

#[tokio::main]
async fn main() -> resilient_cache::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let settings = Settings::from_env()?;
    let engine = Arc::new(CacheEngine::new(
        InMemoryBackend::new(),
        settings.cache.clone(),
    ));
    let resilience = Arc::new(ResilienceManager::new(settings.resilience.clone()));
    let feed = Arc::new(StockFeed {
        calls: AtomicU32::new(0),
    });

    println!("=== Plain cache ===");
    let options = SetOptions::for_category(&settings.cache.ttl, DataCategory::Vehicle).tag("vehicles");
    let stock = feed.fetch().await.unwrap_or_default();
    engine.set("vehicles:list:p1", &stock, &options).await;
    let cached: Option<Vec<Vehicle>> = engine.get("vehicles:list:p1").await;
    println!("  cached page: {:?}", cached.map(|v| v.len()));

    let removed = engine.invalidate_by_tag("vehicles").await;
    println!("  invalidated {} entries tagged 'vehicles'", removed);

    println!("\n=== Stale-while-revalidate over a resilient fetch ===");
    let swr = SwrCache::new(Arc::clone(&engine));
    let fetcher = {
        let resilience = Arc::clone(&resilience);
        let feed = Arc::clone(&feed);
        move || {
            let resilience = Arc::clone(&resilience);
            let feed = Arc::clone(&feed);
            async move {
                resilience
                    .execute_with_resilience(
                        || feed.fetch(),
                        ResilienceOptions::new("stock-feed").fallback_cache_key("stock:featured"),
                    )
                    .await
            }
        }
    };
    let swr_options = SwrOptions::new(600).revalidate(60).tag("featured");

    for round in 1..=4 {
        match swr.get_or_fetch("featured", fetcher.clone(), &swr_options).await {
            Ok(vehicles) => println!("  round {}: {} vehicles", round, vehicles.len()),
            Err(e) => println!("  round {}: failed: {}", round, e),
        }
    }

    swr.shutdown(Duration::from_secs(5)).await;

    println!("\n=== Health ===");
    let health = resilience.health();
    println!("  healthy: {}", health.healthy);
    println!("  open circuits: {:?}", health.open_circuits);
    println!("  fallback entries: {}", health.fallback_entries);

    let metrics = engine.metrics();
    println!(
        "  cache hits: {} misses: {} writes: {} hit rate: {:.2}",
        metrics.hits, metrics.misses, metrics.writes, metrics.hit_ratio
    );

    Ok(())
}
