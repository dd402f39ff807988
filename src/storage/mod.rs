//! Persistent storage backends.

use crate::error::Result;
use std::future::Future;

pub mod inmemory;

pub use inmemory::InMemoryStorage;

/// Trait for the byte-oriented key/value engine the cache persists into.
///
/// Abstracts the platform store (app-local database, keychain-adjacent kv
/// file, test memory), allowing swappable engines. Expiry is NOT a storage
/// concern: the [`crate::cache::CacheStore`] owns TTL bookkeeping through
/// its metadata index, so backends store and return bytes verbatim.
///
/// **IMPORTANT:** All methods take `&self` to allow concurrent access.
/// Implementations should use interior mutability (DashMap, RwLock, or an
/// external store). Futures are declared `Send` so components over any
/// backend can be driven from spawned tasks.
pub trait StorageBackend: Send + Sync + Clone {
    /// Retrieve raw bytes by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found
    /// - `Ok(None)` - Key not present
    ///
    /// # Errors
    /// Returns `Err` if the engine fails (corrupt file, I/O error, etc.)
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store raw bytes under a key, overwriting any previous value.
    ///
    /// # Errors
    /// Returns `Err` if the engine fails
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Remove a key. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the engine fails
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Enumerate every key starting with `prefix`.
    ///
    /// Used once at startup to rebuild the cache metadata index and the
    /// pending-submission queue order.
    ///
    /// # Errors
    /// Returns `Err` if the engine fails
    fn keys(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Check if a key exists (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if the engine fails
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Remove every key starting with `prefix`.
    ///
    /// Default implementation enumerates then deletes one by one.
    ///
    /// # Errors
    /// Returns `Err` if the engine fails
    fn delete_prefix(&self, prefix: &str) -> impl Future<Output = Result<()>> + Send {
        async move {
            for key in self.keys(prefix).await? {
                self.delete(&key).await?;
            }
            Ok(())
        }
    }

    /// Health check - verify the engine is accessible.
    ///
    /// # Errors
    /// Returns `Err` if the engine is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(true) }
    }
}
