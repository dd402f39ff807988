//! In-memory storage backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Primarily for tests and for apps that only want session-lived caching.

use super::StorageBackend;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Thread-safe async in-memory storage backend.
///
/// Uses DashMap for lock-free concurrent access with fine-grained per-key
/// sharding. No async locks required - operations are non-blocking.
///
/// # Example
///
/// ```no_run
/// use offline_kit::storage::{InMemoryStorage, StorageBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let storage = InMemoryStorage::new();
///
///     storage.put("entry:alerts", b"payload".to_vec()).await?;
///     let value = storage.get("entry:alerts").await?;
///     assert!(value.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryStorage {
    store: Arc<DashMap<String, Vec<u8>>>,
    // When set, every operation fails. Lets tests exercise the cache
    // layer's fail-open path without a real broken disk.
    poisoned: Arc<AtomicBool>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage backend.
    pub fn new() -> Self {
        InMemoryStorage {
            store: Arc::new(DashMap::new()),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the current number of stored keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Make every subsequent operation fail with a storage error.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    /// Restore normal operation after [`poison`](Self::poison).
    pub fn heal(&self) {
        self.poisoned.store(false, Ordering::SeqCst);
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            Err(Error::StorageError("storage engine unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_poisoned()?;

        match self.store.get(key) {
            Some(value) => {
                debug!("✓ InMemory GET {} -> HIT", key);
                Ok(Some(value.clone()))
            }
            None => {
                debug!("✓ InMemory GET {} -> MISS", key);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_poisoned()?;

        self.store.insert(key.to_string(), value);
        debug!("✓ InMemory PUT {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_poisoned()?;

        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_poisoned()?;

        let keys: Vec<String> = self
            .store
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();

        debug!("✓ InMemory KEYS {}* -> {} found", prefix, keys.len());
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_poisoned()?;
        Ok(self.store.contains_key(key))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.poisoned.load(Ordering::SeqCst))
    }
}
