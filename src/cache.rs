//! Typed, TTL-based cache store with a parallel metadata index.
//!
//! The store owns every cache entry in the app: alert lists, single
//! alerts, opaque API responses, and the pending-submission records the
//! queue persists through it. Payloads are a tagged union so a read can
//! never confuse one kind for another, and every entry has a parallel
//! metadata record so expiry sweeps never deserialize payloads.
//!
//! Expiry is lazy (checked on [`CacheStore::get`]) plus an eager sweep at
//! [`CacheStore::open`]. Storage I/O errors on the read path are treated
//! as a miss (fail-open): a corrupt or unavailable local store degrades
//! into refetching, never into a crash.

use crate::alert::{Alert, AlertQuery};
use crate::error::Result;
use crate::queue::PendingSubmission;
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use crate::storage::StorageBackend;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ENTRY_PREFIX: &str = "entry:";
const META_PREFIX: &str = "meta:";

/// Current wall-clock time as unix epoch milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Discriminator for what a cache entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    /// A list of alerts for one normalized query
    AlertsList,
    /// One alert by id
    SingleAlert,
    /// An opaque JSON response from some endpoint
    ApiResponse,
    /// A queued write awaiting upload (expiry managed by the queue)
    PendingSubmission,
}

impl CacheKind {
    /// Default time-to-live for entries of this kind.
    ///
    /// `None` means the entry never expires through the cache path.
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            CacheKind::AlertsList | CacheKind::SingleAlert => {
                Some(Duration::from_secs(24 * 60 * 60))
            }
            CacheKind::ApiResponse => Some(Duration::from_secs(30 * 60)),
            CacheKind::PendingSubmission => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::AlertsList => "alerts_list",
            CacheKind::SingleAlert => "single_alert",
            CacheKind::ApiResponse => "api_response",
            CacheKind::PendingSubmission => "pending_submission",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached alerts list together with the query that produced it.
///
/// Embedding the query lets the sync manager refresh a cached list
/// without any external key-to-query mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub query: AlertQuery,
    pub items: Vec<Alert>,
}

/// The tagged payload stored in a cache entry.
///
/// Exactly one variant per [`CacheKind`]; pattern matching is exhaustive,
/// so a payload can never be read back as the wrong kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CachePayload {
    AlertsList(ListSnapshot),
    SingleAlert(Alert),
    ApiResponse(serde_json::Value),
    PendingSubmission(PendingSubmission),
}

impl CachePayload {
    /// The kind discriminator for this payload.
    pub fn kind(&self) -> CacheKind {
        match self {
            CachePayload::AlertsList(_) => CacheKind::AlertsList,
            CachePayload::SingleAlert(_) => CacheKind::SingleAlert,
            CachePayload::ApiResponse(_) => CacheKind::ApiResponse,
            CachePayload::PendingSubmission(_) => CacheKind::PendingSubmission,
        }
    }
}

/// Metadata record paired one-to-one with every cache entry.
///
/// Kept in a parallel index so bulk expiry decisions never touch payload
/// bytes. Invariant: an entry and its metadata are written and removed
/// together in the same logical operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub kind: CacheKind,
    /// Unix epoch milliseconds when the entry was written
    pub created_at_ms: u64,
    /// Per-entry TTL override in milliseconds
    pub custom_expiry_ms: Option<u64>,
}

impl CacheMetadata {
    fn ttl_ms(&self) -> Option<u64> {
        self.custom_expiry_ms
            .or_else(|| self.kind.default_ttl().map(|d| d.as_millis() as u64))
    }

    /// Whether the entry has outlived its TTL at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.ttl_ms() {
            Some(ttl) => now_ms.saturating_sub(self.created_at_ms) >= ttl,
            None => false,
        }
    }
}

/// Per-kind entry counts returned by [`CacheStore::stats`].
#[derive(Clone, Debug, Default)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub counts_by_kind: HashMap<&'static str, usize>,
    pub expired_entries: usize,
}

/// Typed TTL cache persisted through a [`StorageBackend`].
///
/// Entries are immutable once written: a `put` to an existing key
/// overwrites entry and metadata together, never mutates in place.
///
/// # Example
///
/// ```no_run
/// use offline_kit::cache::{CachePayload, CacheStore};
/// use offline_kit::storage::InMemoryStorage;
///
/// #[tokio::main]
/// async fn main() -> offline_kit::Result<()> {
///     let cache = CacheStore::new(InMemoryStorage::new());
///     let removed = cache.open().await;
///     println!("startup sweep removed {} entries", removed);
///     Ok(())
/// }
/// ```
pub struct CacheStore<S: StorageBackend> {
    storage: S,
    index: DashMap<String, CacheMetadata>,
}

impl<S: StorageBackend> CacheStore<S> {
    /// Create a cache store over the given storage engine.
    ///
    /// Call [`open`](Self::open) before first use to rebuild the metadata
    /// index and run the startup expiry sweep.
    pub fn new(storage: S) -> Self {
        CacheStore {
            storage,
            index: DashMap::new(),
        }
    }

    /// Load the metadata index from storage and sweep expired entries.
    ///
    /// Returns the number of entries removed by the sweep. Fail-open: a
    /// broken storage engine yields an empty index, not an error.
    pub async fn open(&self) -> usize {
        let meta_keys = match self.storage.keys(META_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("⚠ Cache index load failed, starting empty: {}", e);
                return 0;
            }
        };

        for meta_key in meta_keys {
            let key = meta_key.trim_start_matches(META_PREFIX).to_string();
            match self.read_metadata(&meta_key).await {
                Some(meta) => {
                    self.index.insert(key, meta);
                }
                None => {
                    // Orphaned or unreadable metadata record; drop both halves.
                    let _ = self.storage.delete(&meta_key).await;
                    let _ = self.storage.delete(&format!("{}{}", ENTRY_PREFIX, key)).await;
                }
            }
        }

        let removed = self.sweep_expired().await;
        info!(
            "✓ Cache opened: {} live entries, {} expired removed",
            self.index.len(),
            removed
        );
        removed
    }

    /// Store a payload under `key`, overwriting any previous entry.
    ///
    /// `custom_expiry` overrides the kind's default TTL for this entry
    /// only.
    ///
    /// # Errors
    ///
    /// Returns `Err` if serialization or the storage engine fails. The
    /// write path is not fail-open; callers that can tolerate a lost
    /// write (e.g. opportunistic cache warming) log and move on.
    pub async fn put(
        &self,
        key: &str,
        payload: CachePayload,
        custom_expiry: Option<Duration>,
    ) -> Result<()> {
        let meta = CacheMetadata {
            kind: payload.kind(),
            created_at_ms: unix_millis(),
            custom_expiry_ms: custom_expiry.map(|d| d.as_millis() as u64),
        };

        let entry_bytes = serialize_for_cache(&payload)?;
        let meta_bytes = serialize_for_cache(&meta)?;

        self.storage
            .put(&format!("{}{}", ENTRY_PREFIX, key), entry_bytes)
            .await?;
        self.storage
            .put(&format!("{}{}", META_PREFIX, key), meta_bytes)
            .await?;
        self.index.insert(key.to_string(), meta);

        debug!("✓ Cache PUT {} ({})", key, payload.kind());
        Ok(())
    }

    /// Retrieve a payload, deleting it if expired.
    ///
    /// Returns `None` on miss, on expiry, and on any storage or decode
    /// error (fail-open).
    pub async fn get(&self, key: &str) -> Option<CachePayload> {
        let meta = self.index.get(key).map(|m| m.clone())?;

        if meta.is_expired(unix_millis()) {
            debug!("✗ Cache GET {} -> EXPIRED, removing", key);
            let _ = self.delete(key).await;
            return None;
        }

        self.read_payload(key).await
    }

    /// Non-destructive read that tolerates expiry.
    ///
    /// Returns the payload plus `true` when the entry is past its TTL.
    /// Used by the gateway's stale-serve path, which would rather show an
    /// old list than nothing at all.
    pub async fn peek(&self, key: &str) -> Option<(CachePayload, bool)> {
        let meta = self.index.get(key).map(|m| m.clone())?;
        let is_stale = meta.is_expired(unix_millis());
        let payload = self.read_payload(key).await?;
        Some((payload, is_stale))
    }

    /// Most recent non-expired payload of the given kind.
    ///
    /// Scans the metadata index sorted by creation time descending; used
    /// when the caller has no natural cache key ("the latest alerts list,
    /// whatever it was for").
    pub async fn get_latest_of_kind(&self, kind: CacheKind) -> Option<CachePayload> {
        let now = unix_millis();
        let mut candidates: Vec<(String, u64)> = self
            .index
            .iter()
            .filter(|e| e.value().kind == kind && !e.value().is_expired(now))
            .map(|e| (e.key().clone(), e.value().created_at_ms))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        for (key, _) in candidates {
            if let Some(payload) = self.read_payload(&key).await {
                return Some(payload);
            }
        }
        None
    }

    /// Every readable entry of the given kind, newest first, stale
    /// included.
    ///
    /// The sync manager uses this to enumerate refresh candidates.
    pub async fn entries_of_kind(&self, kind: CacheKind) -> Vec<(String, CachePayload)> {
        let mut keys: Vec<(String, u64)> = self
            .index
            .iter()
            .filter(|e| e.value().kind == kind)
            .map(|e| (e.key().clone(), e.value().created_at_ms))
            .collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1));

        let mut entries = Vec::with_capacity(keys.len());
        for (key, _) in keys {
            if let Some(payload) = self.read_payload(&key).await {
                entries.push((key, payload));
            }
        }
        entries
    }

    /// Remove an entry and its metadata together.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage
            .delete(&format!("{}{}", ENTRY_PREFIX, key))
            .await?;
        self.storage
            .delete(&format!("{}{}", META_PREFIX, key))
            .await?;
        self.index.remove(key);
        debug!("✓ Cache DELETE {}", key);
        Ok(())
    }

    /// Remove every entry and metadata record.
    pub async fn clear(&self) -> Result<()> {
        self.storage.delete_prefix(ENTRY_PREFIX).await?;
        self.storage.delete_prefix(META_PREFIX).await?;
        self.index.clear();
        warn!("⚠ Cache CLEAR executed - all entries removed");
        Ok(())
    }

    /// Delete every expired entry; returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = unix_millis();
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.delete(&key).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("✓ Cache sweep removed {} expired entries", removed);
        }
        removed
    }

    /// Entry counts per kind plus the number currently past TTL.
    pub fn stats(&self) -> CacheStatistics {
        let now = unix_millis();
        let mut stats = CacheStatistics::default();

        for entry in self.index.iter() {
            stats.total_entries += 1;
            *stats
                .counts_by_kind
                .entry(entry.value().kind.as_str())
                .or_insert(0) += 1;
            if entry.value().is_expired(now) {
                stats.expired_entries += 1;
            }
        }
        stats
    }

    /// Metadata for a key, if live in the index.
    pub fn metadata(&self, key: &str) -> Option<CacheMetadata> {
        self.index.get(key).map(|m| m.clone())
    }

    async fn read_payload(&self, key: &str) -> Option<CachePayload> {
        let bytes = match self.storage.get(&format!("{}{}", ENTRY_PREFIX, key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠ Cache read failed for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        match deserialize_from_cache::<CachePayload>(&bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("⚠ Cache entry {} unreadable, evicting: {}", key, e);
                let _ = self.delete(key).await;
                None
            }
        }
    }

    async fn read_metadata(&self, meta_key: &str) -> Option<CacheMetadata> {
        let bytes = self.storage.get(meta_key).await.ok()??;
        deserialize_from_cache::<CacheMetadata>(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn sample_alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            title: "Seal on the pier".to_string(),
            description: None,
            category: "wildlife".to_string(),
            level: 1,
            latitude: 40.0,
            longitude: -74.0,
            reported_at_ms: unix_millis(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");

        let payload = cache.get("alert:a-1").await.expect("Entry should be live");
        match payload {
            CachePayload::SingleAlert(alert) => assert_eq!(alert.id, "a-1"),
            other => panic!("Wrong payload kind: {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_ttl_expiry_removes_entry() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                Some(Duration::from_millis(50)),
            )
            .await
            .expect("Failed to put");

        assert!(cache.get("alert:a-1").await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cache.get("alert:a-1").await.is_none());
        // The expired entry is gone from stats too
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_peek_serves_stale_without_deleting() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                Some(Duration::from_millis(30)),
            )
            .await
            .expect("Failed to put");

        tokio::time::sleep(Duration::from_millis(60)).await;

        let (payload, is_stale) = cache.peek("alert:a-1").await.expect("peek should serve");
        assert!(is_stale);
        assert!(matches!(payload, CachePayload::SingleAlert(_)));
        // Still present for the next stale read
        assert!(cache.peek("alert:a-1").await.is_some());
    }

    #[tokio::test]
    async fn test_latest_of_kind_orders_by_creation() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:old",
                CachePayload::SingleAlert(sample_alert("old")),
                None,
            )
            .await
            .expect("Failed to put");
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache
            .put(
                "alert:new",
                CachePayload::SingleAlert(sample_alert("new")),
                None,
            )
            .await
            .expect("Failed to put");

        let latest = cache
            .get_latest_of_kind(CacheKind::SingleAlert)
            .await
            .expect("Should find an entry");
        match latest {
            CachePayload::SingleAlert(alert) => assert_eq!(alert.id, "new"),
            other => panic!("Wrong payload kind: {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_latest_of_kind_skips_expired() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:short",
                CachePayload::SingleAlert(sample_alert("short")),
                Some(Duration::from_millis(20)),
            )
            .await
            .expect("Failed to put");

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache.get_latest_of_kind(CacheKind::SingleAlert).await.is_none());
    }

    #[tokio::test]
    async fn test_open_rebuilds_index_and_sweeps() {
        let storage = InMemoryStorage::new();

        {
            let cache = CacheStore::new(storage.clone());
            cache
                .put(
                    "alert:keep",
                    CachePayload::SingleAlert(sample_alert("keep")),
                    None,
                )
                .await
                .expect("Failed to put");
            cache
                .put(
                    "alert:drop",
                    CachePayload::SingleAlert(sample_alert("drop")),
                    Some(Duration::from_millis(10)),
                )
                .await
                .expect("Failed to put");
        }

        tokio::time::sleep(Duration::from_millis(40)).await;

        // Fresh store over the same engine, as after an app restart
        let cache = CacheStore::new(storage);
        let removed = cache.open().await;

        assert_eq!(removed, 1);
        assert!(cache.get("alert:keep").await.is_some());
        assert!(cache.get("alert:drop").await.is_none());
    }

    #[tokio::test]
    async fn test_storage_error_is_a_miss() {
        let storage = InMemoryStorage::new();
        let cache = CacheStore::new(storage.clone());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");

        storage.poison();
        assert!(cache.get("alert:a-1").await.is_none());

        storage.heal();
        assert!(cache.get("alert:a-1").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_evicted_on_read() {
        let storage = InMemoryStorage::new();
        let cache = CacheStore::new(storage.clone());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");

        // Scribble over the payload bytes behind the store's back
        storage
            .put("entry:alert:a-1", vec![0xba, 0xad])
            .await
            .expect("Failed to corrupt");

        assert!(cache.get("alert:a-1").await.is_none());
        assert!(cache.metadata("alert:a-1").is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_by_kind() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");
        cache
            .put(
                "alerts:q",
                CachePayload::AlertsList(ListSnapshot {
                    query: AlertQuery::near(40.0, -74.0, 50),
                    items: vec![sample_alert("a-1")],
                }),
                None,
            )
            .await
            .expect("Failed to put");

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.counts_by_kind.get("single_alert"), Some(&1));
        assert_eq!(stats.counts_by_kind.get("alerts_list"), Some(&1));
        assert_eq!(stats.expired_entries, 0);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let storage = InMemoryStorage::new();
        let cache = CacheStore::new(storage.clone());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");

        cache.clear().await.expect("Failed to clear");

        assert_eq!(cache.stats().total_entries, 0);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry_and_metadata() {
        let cache = CacheStore::new(InMemoryStorage::new());

        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                Some(Duration::from_millis(10)),
            )
            .await
            .expect("Failed to put");
        cache
            .put(
                "alert:a-1",
                CachePayload::SingleAlert(sample_alert("a-1")),
                None,
            )
            .await
            .expect("Failed to put");

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Second put reset created_at and dropped the short TTL
        assert!(cache.get("alert:a-1").await.is_some());
        assert_eq!(cache.stats().total_entries, 1);
    }
}
