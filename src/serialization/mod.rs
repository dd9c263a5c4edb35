//! Versioned envelopes, value codecs and payload compression.
//!
//! Every value the engine writes to the store is framed like this:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (4 bytes)│ CacheEntry (postcard)            │
//! └─────────────────┴─────────────────┴──────────────────────────────────┘
//!   "RCCH"              u32               payload = codec bytes, maybe gzip
//! ```
//!
//! The envelope is always postcard. The value inside the entry is encoded with
//! the engine's [`CacheCodec`], so callers can choose JSON when other
//! processes need to read the payload.
//!
//! # Example
//!
//! ```rust
//! use resilient_cache::serialization::{serialize_for_cache, deserialize_from_cache};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Listing {
//!     id: u64,
//!     make: String,
//! }
//!
//! # fn main() -> resilient_cache::Result<()> {
//! let listing = Listing { id: 1, make: "Volvo".to_string() };
//! let bytes = serialize_for_cache(&listing)?;
//! let back: Listing = deserialize_from_cache(&bytes)?;
//! assert_eq!(listing, back);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod compression;

pub use codec::{CacheCodec, JsonCodec, PostcardCodec};

/// Magic header for store entries written by this crate: b"RCCH"
///
/// Any entry without this magic is rejected during deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"RCCH";

/// Current schema version.
///
/// **CRITICAL:** Increment this constant when the layout of
/// [`crate::entry::CacheEntry`] changes. Old entries are then treated as
/// misses and rewritten by the next `set`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for store entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"RCCH"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The wrapped data
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for store writes.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from store bytes, validating the envelope.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        debug!("Cache envelope decode failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
