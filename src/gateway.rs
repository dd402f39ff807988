//! Offline-first read/write gateway.
//!
//! The one entry point business logic calls for alert data. Reads are
//! cache-first with a remote fallback; writes upload directly when the
//! network allows and park in the [`PendingSubmissionQueue`] when it does
//! not. Every remote call is composed retry-outermost: each attempt the
//! [`RetryExecutor`] makes passes through the [`CircuitBreaker`], so a
//! breaker that opens mid-sequence fails the next attempt immediately with
//! a non-retryable [`Error::CircuitOpen`].

use crate::alert::{Alert, AlertDraft, AlertQuery};
use crate::api::RemoteApi;
use crate::breaker::CircuitBreaker;
use crate::cache::{unix_millis, CachePayload, CacheStatistics, CacheStore, ListSnapshot};
use crate::error::{Error, Result};
use crate::key::QueryKeyBuilder;
use crate::network::{NetworkMonitor, ReachabilityProbe};
use crate::queue::{PendingSubmission, PendingSubmissionQueue};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::storage::StorageBackend;
use std::sync::Arc;

/// Operation names shared by the retry metrics and breaker registries.
pub const OP_FETCH_LIST: &str = "fetch_alerts";
pub const OP_FETCH_ONE: &str = "fetch_alert";
pub const OP_SUBMIT: &str = "submit_alert";

/// Per-read options.
#[derive(Clone, Copy, Debug)]
pub struct FetchOptions {
    /// Skip the cache-hit short-circuit and always try the remote
    pub force_refresh: bool,
    /// Serve an expired cached value rather than failing when the remote
    /// is unavailable
    pub allow_stale: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            force_refresh: false,
            allow_stale: true,
        }
    }
}

impl FetchOptions {
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn no_stale(mut self) -> Self {
        self.allow_stale = false;
        self
    }
}

/// A read result tagged with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    /// Whether the value came from the local cache
    pub from_cache: bool,
    /// Whether the value was served past its freshness window because no
    /// better data was obtainable
    pub is_stale: bool,
}

impl<T> Fetched<T> {
    fn fresh_remote(value: T) -> Self {
        Fetched {
            value,
            from_cache: false,
            is_stale: false,
        }
    }

    fn cache_hit(value: T) -> Self {
        Fetched {
            value,
            from_cache: true,
            is_stale: false,
        }
    }

    fn stale(value: T) -> Self {
        Fetched {
            value,
            from_cache: true,
            is_stale: true,
        }
    }
}

/// What happened to a submitted write.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// The remote accepted the write; carries the server-assigned id
    Uploaded { id: String },
    /// The write is parked in the pending queue; the id is provisional
    /// and local-only until the sync manager delivers it
    Queued { provisional_id: String },
}

/// Orchestrates cache-first reads and offline-tolerant writes.
///
/// One code path serves direct calls and sync-triggered refreshes alike;
/// the sync manager calls back into the same methods business logic uses.
pub struct OfflineFirstGateway<S, A, P>
where
    S: StorageBackend,
    A: RemoteApi,
    P: ReachabilityProbe,
{
    cache: Arc<CacheStore<S>>,
    queue: Arc<PendingSubmissionQueue<S>>,
    network: Arc<NetworkMonitor<P>>,
    retry: Arc<RetryExecutor>,
    breaker: Arc<CircuitBreaker>,
    api: Arc<A>,
    policy: RetryPolicy,
}

impl<S, A, P> OfflineFirstGateway<S, A, P>
where
    S: StorageBackend,
    A: RemoteApi,
    P: ReachabilityProbe,
{
    pub fn new(
        cache: Arc<CacheStore<S>>,
        queue: Arc<PendingSubmissionQueue<S>>,
        network: Arc<NetworkMonitor<P>>,
        retry: Arc<RetryExecutor>,
        breaker: Arc<CircuitBreaker>,
        api: Arc<A>,
    ) -> Self {
        OfflineFirstGateway {
            cache,
            queue,
            network,
            retry,
            breaker,
            api,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy applied to remote calls.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch the alerts matching `query`, cache-first.
    ///
    /// 1. Unless `force_refresh`, a fresh cache hit returns immediately.
    /// 2. When connected, the remote is called through retry + breaker
    ///    and the cache slot replaced on success.
    /// 3. Offline or on remote failure: the most recent cached value for
    ///    the slot is served tagged `is_stale` if `allow_stale`, else the
    ///    call fails.
    ///
    /// # Errors
    ///
    /// `Error::NetworkUnavailable` offline with no usable cache entry;
    /// otherwise the classified remote error.
    pub async fn get_list(
        &self,
        query: &AlertQuery,
        options: FetchOptions,
    ) -> Result<Fetched<Vec<Alert>>> {
        let key = QueryKeyBuilder::list_key(query);

        if !options.force_refresh {
            if let Some((CachePayload::AlertsList(snapshot), false)) = self.cache.peek(&key).await {
                debug!("✓ get_list served from cache ({})", key);
                return Ok(Fetched::cache_hit(snapshot.items));
            }
        }

        if self.network.is_connected() {
            let result = self
                .retry
                .execute_with_retry(
                    OP_FETCH_LIST,
                    || self.breaker.call(OP_FETCH_LIST, self.api.fetch_list(query)),
                    &self.policy,
                )
                .await;

            match result {
                Ok(items) => {
                    let snapshot = ListSnapshot {
                        query: query.clone(),
                        items: items.clone(),
                    };
                    if let Err(e) = self
                        .cache
                        .put(&key, CachePayload::AlertsList(snapshot), None)
                        .await
                    {
                        warn!("⚠ Failed to cache alerts list {}: {}", key, e);
                    }
                    return Ok(Fetched::fresh_remote(items));
                }
                Err(e) => {
                    debug!("✗ Remote list fetch failed ({}), trying stale path", e);
                    return self.stale_list(&key, options, e).await;
                }
            }
        }

        self.stale_list(&key, options, Error::NetworkUnavailable).await
    }

    /// Fetch one alert by id, cache-first. Same pattern as
    /// [`get_list`](Self::get_list) at single-entity granularity.
    pub async fn get_one(
        &self,
        id: &str,
        options: FetchOptions,
    ) -> Result<Fetched<Option<Alert>>> {
        let key = QueryKeyBuilder::alert_key(id);

        if !options.force_refresh {
            if let Some((CachePayload::SingleAlert(alert), false)) = self.cache.peek(&key).await {
                debug!("✓ get_one served from cache ({})", key);
                return Ok(Fetched::cache_hit(Some(alert)));
            }
        }

        if self.network.is_connected() {
            let result = self
                .retry
                .execute_with_retry(
                    OP_FETCH_ONE,
                    || self.breaker.call(OP_FETCH_ONE, self.api.fetch_one(id)),
                    &self.policy,
                )
                .await;

            match result {
                Ok(Some(alert)) => {
                    if let Err(e) = self
                        .cache
                        .put(&key, CachePayload::SingleAlert(alert.clone()), None)
                        .await
                    {
                        warn!("⚠ Failed to cache alert {}: {}", id, e);
                    }
                    return Ok(Fetched::fresh_remote(Some(alert)));
                }
                Ok(None) => return Ok(Fetched::fresh_remote(None)),
                Err(e) => {
                    debug!("✗ Remote alert fetch failed ({}), trying stale path", e);
                    return self.stale_one(&key, options, e).await;
                }
            }
        }

        self.stale_one(&key, options, Error::NetworkUnavailable).await
    }

    /// Submit a locally-authored alert.
    ///
    /// Connected: upload directly (through retry + breaker); the new
    /// alert warms its cache slot and the server id is returned. On
    /// failure or while offline the draft is enqueued and a provisional
    /// id returned — unless `requires_connection`, which fails fast
    /// instead of queueing.
    pub async fn submit(
        &self,
        draft: AlertDraft,
        requires_connection: bool,
    ) -> Result<SubmitOutcome> {
        if self.network.is_connected() {
            let result = self
                .retry
                .execute_with_retry(
                    OP_SUBMIT,
                    || self.breaker.call(OP_SUBMIT, self.api.submit(&draft)),
                    &self.policy,
                )
                .await;

            match result {
                Ok(id) => {
                    self.warm_submitted(&id, &draft).await;
                    return Ok(SubmitOutcome::Uploaded { id });
                }
                Err(e) if requires_connection => return Err(e),
                Err(e) => {
                    info!("» Direct upload failed ({}), queueing submission", e);
                }
            }
        } else if requires_connection {
            return Err(Error::NetworkUnavailable);
        }

        let provisional_id = self.queue.enqueue(draft).await?;
        Ok(SubmitOutcome::Queued { provisional_id })
    }

    /// Upload one queued submission through the same retry + breaker
    /// stack as a direct submit. Used by the sync manager's drain loop.
    pub async fn upload_pending(&self, submission: PendingSubmission) -> Result<String> {
        let id = self
            .retry
            .execute_with_retry(
                OP_SUBMIT,
                || self.breaker.call(OP_SUBMIT, self.api.submit(&submission.payload)),
                &self.policy,
            )
            .await?;
        self.warm_submitted(&id, &submission.payload).await;
        Ok(id)
    }

    /// Per-kind cache entry counts.
    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.stats()
    }

    /// Drop every cached entry (pending submissions included — callers
    /// should drain the queue first if those matter).
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    async fn stale_list(
        &self,
        key: &str,
        options: FetchOptions,
        error: Error,
    ) -> Result<Fetched<Vec<Alert>>> {
        if options.allow_stale {
            if let Some((CachePayload::AlertsList(snapshot), _)) = self.cache.peek(key).await {
                info!("» Serving stale alerts list for {}", key);
                return Ok(Fetched::stale(snapshot.items));
            }
        }
        Err(error)
    }

    async fn stale_one(
        &self,
        key: &str,
        options: FetchOptions,
        error: Error,
    ) -> Result<Fetched<Option<Alert>>> {
        if options.allow_stale {
            if let Some((CachePayload::SingleAlert(alert), _)) = self.cache.peek(key).await {
                info!("» Serving stale alert for {}", key);
                return Ok(Fetched::stale(Some(alert)));
            }
        }
        Err(error)
    }

    /// After a confirmed upload, seed the single-alert slot so an
    /// immediate read-back hits cache.
    async fn warm_submitted(&self, id: &str, draft: &AlertDraft) {
        let alert = Alert {
            id: id.to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            category: draft.category.clone(),
            level: draft.level,
            latitude: draft.latitude,
            longitude: draft.longitude,
            reported_at_ms: unix_millis(),
        };
        let key = QueryKeyBuilder::alert_key(id);
        if let Err(e) = self
            .cache
            .put(&key, CachePayload::SingleAlert(alert), None)
            .await
        {
            warn!("⚠ Failed to warm cache for submitted alert {}: {}", id, e);
        }
    }
}
