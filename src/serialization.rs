//! Postcard-based cache serialization with versioned envelopes.
//!
//! Every value persisted by the toolkit is wrapped in a versioned envelope
//! so that corruption and schema drift are detected on read instead of
//! silently producing garbage:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  magic: [u8; 4] │ version: u32    │  postcard payload: T     │
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "OKIT"                                postcard::to_allocvec(T)
//! ```
//!
//! - **Deterministic:** the same value always produces identical bytes
//! - **Validated:** magic and version are checked on every deserialization
//! - **Versioned:** schema changes force eviction, not silent migration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for offline-kit entries: b"OKIT"
///
/// Any entry without this signature is rejected during deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"OKIT";

/// Current schema version.
///
/// Increment when making breaking changes to persisted types (adding or
/// removing fields, changing field types, reordering, changing enum
/// variants). Entries written by an older build are evicted and refetched
/// on next access.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for persisted entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"OKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The actual persisted data
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

/// Serialize a value with envelope for cache storage.
///
/// This is the canonical way to produce bytes for a [`crate::storage::StorageBackend`].
///
/// # Errors
///
/// Returns `Error::SerializationError` if postcard encoding fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope {
        magic: CACHE_MAGIC,
        version: CURRENT_SCHEMA_VERSION,
        payload: value,
    };

    postcard::to_allocvec(&envelope).map_err(|e| Error::SerializationError(e.to_string()))
}

/// Deserialize a value from envelope-wrapped cache bytes.
///
/// Validates the magic header and schema version before handing back the
/// payload.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: bad magic or corrupted envelope
/// - `Error::VersionMismatch`: schema version changed
pub fn deserialize_from_cache<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes)
        .map_err(|e| Error::InvalidCacheEntry(format!("envelope decode failed: {}", e)))?;

    if envelope.magic != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "bad magic: {:?}",
            envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Sample {
        id: u64,
        name: String,
    }

    #[test]
    fn test_roundtrip() {
        let value = Sample {
            id: 7,
            name: "harbor seal".to_string(),
        };

        let bytes = serialize_for_cache(&value).expect("Failed to serialize");
        let back: Sample = deserialize_from_cache(&bytes).expect("Failed to deserialize");

        assert_eq!(value, back);
    }

    #[test]
    fn test_envelope_carries_magic_and_version() {
        let envelope = CacheEnvelope::new(42u32);
        assert_eq!(envelope.magic, *b"OKIT");
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_garbage_rejected() {
        let result: Result<Sample> = deserialize_from_cache(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(result.is_err());
    }

    #[test]
    fn test_version_mismatch_detected() {
        let envelope = CacheEnvelope {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION + 1,
            payload: Sample {
                id: 1,
                name: "old".to_string(),
            },
        };
        let bytes = postcard::to_allocvec(&envelope).expect("Failed to encode");

        let result: Result<Sample> = deserialize_from_cache(&bytes);
        assert!(matches!(result, Err(Error::VersionMismatch { .. })));
    }
}
