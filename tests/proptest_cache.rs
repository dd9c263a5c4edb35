//! Property-based tests for the cache round-trip.
//!
//! # Properties Tested
//!
//! 1. **Roundtrip Property**: `get(k)` after `set(k, v)` returns `v`, on both
//!    sides of the compression threshold and with either codec
//! 2. **Envelope Property**: every stored entry carries the magic header and
//!    current schema version
//! 3. **Tag Property**: invalidating a tag removes every entry written with it

use proptest::prelude::*;
use resilient_cache::backend::{CacheBackend, InMemoryBackend};
use resilient_cache::serialization::{JsonCodec, CACHE_MAGIC, CURRENT_SCHEMA_VERSION};
use resilient_cache::{CacheConfig, CacheEngine, SetOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Vehicle {
    id: u64,
    make: String,
    model: String,
    mileage: u32,
    features: Vec<String>,
    price_pence: i64,
}

fn arb_vehicle() -> impl Strategy<Value = Vehicle> {
    (
        any::<u64>(),
        "[A-Za-z ]{0,20}",
        any::<String>(),
        any::<u32>(),
        prop::collection::vec(any::<String>(), 0..8),
        any::<i64>(),
    )
        .prop_map(|(id, make, model, mileage, features, price_pence)| Vehicle {
            id,
            make,
            model,
            mileage,
            features,
            price_pence,
        })
}

/// Between 0 and ~200 vehicles, so payloads fall on both sides of 1024 bytes.
fn arb_inventory() -> impl Strategy<Value = Vec<Vehicle>> {
    prop::collection::vec(arb_vehicle(), 0..200)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_engine_roundtrip(key in "[a-z]{1,12}(:[a-z0-9]{1,8}){0,3}", inventory in arb_inventory()) {
        let back = runtime().block_on(async {
            let engine = CacheEngine::new(InMemoryBackend::new(), CacheConfig::default());
            engine.set(&key, &inventory, &SetOptions::new(300)).await;
            engine.get::<Vec<Vehicle>>(&key).await
        });
        prop_assert_eq!(back, Some(inventory));
    }

    #[test]
    fn prop_json_engine_roundtrip(inventory in arb_inventory()) {
        let back = runtime().block_on(async {
            let engine = CacheEngine::with_codec(InMemoryBackend::new(), JsonCodec, CacheConfig::default());
            engine.set("inventory", &inventory, &SetOptions::new(300)).await;
            engine.get::<Vec<Vehicle>>("inventory").await
        });
        prop_assert_eq!(back, Some(inventory));
    }

    #[test]
    fn prop_compression_flag_follows_threshold(inventory in arb_inventory()) {
        let entry = runtime().block_on(async {
            let engine = CacheEngine::new(InMemoryBackend::new(), CacheConfig::default());
            engine.set("inventory", &inventory, &SetOptions::new(300)).await;
            engine.entry("inventory").await
        });
        let entry = entry.expect("entry should be stored");
        prop_assert_eq!(entry.compressed, entry.size_bytes > 1024);
    }

    #[test]
    fn prop_stored_bytes_carry_envelope(vehicle in arb_vehicle()) {
        let raw = runtime().block_on(async {
            let backend = InMemoryBackend::new();
            let engine = CacheEngine::new(backend.clone(), CacheConfig::default());
            engine.set("v", &vehicle, &SetOptions::new(300)).await;
            backend.get("cache:v").await
        });
        let raw = raw.expect("backend get failed").expect("entry missing");
        prop_assert_eq!(&raw[0..4], &CACHE_MAGIC[..]);
        // postcard writes small u32 values as a single varint byte
        prop_assert_eq!(raw[4] as u32, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn prop_tag_invalidation_complete(keys in prop::collection::btree_set("[a-z]{1,10}", 1..20)) {
        let keys: BTreeSet<String> = keys;
        let (removed, remaining, index_exists) = runtime().block_on(async {
            let engine = CacheEngine::new(InMemoryBackend::new(), CacheConfig::default());
            for key in &keys {
                engine.set(key, &1u8, &SetOptions::new(300).tag("t")).await;
            }
            let removed = engine.invalidate_by_tag("t").await;
            let mut remaining = 0;
            for key in &keys {
                if engine.get::<u8>(key).await.is_some() {
                    remaining += 1;
                }
            }
            let index_exists = engine.backend().exists("tag:t").await.unwrap_or(true);
            (removed, remaining, index_exists)
        });
        prop_assert_eq!(removed, keys.len() as u64);
        prop_assert_eq!(remaining, 0);
        prop_assert!(!index_exists);
    }
}
