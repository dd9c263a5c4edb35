//! The stored form of one cached value.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One value as it sits in the store, inside the versioned envelope.
///
/// `payload` holds codec bytes, gzip-compressed when `compressed` is set.
/// `size_bytes` is the encoded size before compression. Expiry is enforced
/// by the store using `ttl_seconds`; the engine keeps no staleness clock of
/// its own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    /// Unix epoch milliseconds at write time.
    pub created_at: u64,
    pub ttl_seconds: u64,
    pub compressed: bool,
    pub size_bytes: u64,
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Age of the entry relative to the wall clock.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.created_at))
    }

    /// TTL as a `Duration`; zero means the store keeps it without expiry.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_zero_means_no_expiry() {
        let entry = CacheEntry {
            key: "cache:k".to_string(),
            payload: vec![],
            created_at: now_millis(),
            ttl_seconds: 0,
            compressed: false,
            size_bytes: 0,
            tags: vec![],
        };
        assert_eq!(entry.ttl(), None);
        assert!(entry.age() < Duration::from_secs(5));
    }
}
