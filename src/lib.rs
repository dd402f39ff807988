//! # offline-kit
//!
//! An offline-first resilience toolkit for Rust clients on unreliable
//! networks.
//!
//! ## Features
//!
//! - **Typed TTL cache:** tagged payloads with a metadata index, lazy and
//!   startup expiry, fail-open reads ([`cache::CacheStore`])
//! - **Retry with backoff:** policy-driven exponential backoff with
//!   additive jitter and per-operation metrics ([`retry::RetryExecutor`])
//! - **Circuit breaking:** per-operation closed/open/half-open breakers
//!   with call timeouts ([`breaker::CircuitBreaker`])
//! - **Durable write queue:** FIFO pending submissions with bounded retry
//!   and dead-lettering ([`queue::PendingSubmissionQueue`])
//! - **Offline-first gateway:** cache-first reads, stale fallback, and
//!   offline-tolerant writes ([`gateway::OfflineFirstGateway`])
//! - **Sync manager:** periodic and connectivity-triggered reconciliation
//!   with an event stream ([`sync::SyncManager`])
//!
//! ## Quick Start
//!
//! Wire the components explicitly and inject them; there are no global
//! singletons:
//!
//! ```ignore
//! use offline_kit::{
//!     breaker::CircuitBreaker,
//!     cache::CacheStore,
//!     gateway::{FetchOptions, OfflineFirstGateway},
//!     network::NetworkMonitor,
//!     queue::PendingSubmissionQueue,
//!     retry::RetryExecutor,
//!     storage::InMemoryStorage,
//!     sync::{SyncConfig, SyncManager},
//! };
//! use std::sync::Arc;
//!
//! // 1. Leaves first
//! let cache = Arc::new(CacheStore::new(InMemoryStorage::new()));
//! cache.open().await;
//! let queue = Arc::new(PendingSubmissionQueue::new(cache.clone()));
//! queue.open().await;
//! let network = Arc::new(NetworkMonitor::new(my_probe));
//!
//! // 2. The gateway is the one entry point for reads and writes
//! let gateway = Arc::new(OfflineFirstGateway::new(
//!     cache.clone(),
//!     queue.clone(),
//!     network.clone(),
//!     Arc::new(RetryExecutor::new()),
//!     Arc::new(CircuitBreaker::new()),
//!     Arc::new(my_api_client),
//! ));
//!
//! // 3. The sync manager reconciles in the background
//! let sync = Arc::new(SyncManager::new(
//!     gateway.clone(), cache, queue, network, SyncConfig::default(),
//! ));
//! sync.start();
//!
//! let alerts = gateway.get_list(&query, FetchOptions::default()).await?;
//! ```

#[macro_use]
extern crate log;

pub mod alert;
pub mod api;
pub mod breaker;
pub mod cache;
pub mod error;
pub mod gateway;
pub mod key;
pub mod network;
pub mod queue;
pub mod retry;
pub mod serialization;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use alert::{Alert, AlertDraft, AlertQuery};
pub use api::RemoteApi;
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::{CacheKind, CachePayload, CacheStore};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{FetchOptions, Fetched, OfflineFirstGateway, SubmitOutcome};
pub use network::{ConnectivityClass, NetworkMonitor, NetworkStatus, ReachabilityProbe};
pub use queue::{PendingSubmission, PendingSubmissionQueue, SubmissionStatus};
pub use retry::{RetryExecutor, RetryPolicy};
pub use storage::StorageBackend;
pub use sync::{SyncConfig, SyncEvent, SyncManager, SyncResult, SyncStatistics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
