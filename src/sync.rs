//! Periodic and event-driven reconciliation.
//!
//! A full sync runs three phases in order: (a) drain the pending
//! submission queue until empty or stuck, (b) refresh cached entries in
//! bounded-concurrency batches, (c) maintenance (expiry sweep and
//! dead-letter pruning). Queued writes are therefore always attempted
//! before any cache refresh in the same pass.
//!
//! Mutual exclusion is a single compare-exchange on an `AtomicBool`:
//! [`SyncManager::force_sync`] returns immediately with `success = false`
//! when a sync is already running, and the periodic timers skip their
//! tick the same way. Cache reads never wait on a sync in progress.
//!
//! Triggers: a coarse timer runs full syncs, a short timer drains only
//! the queue, and a `Connected` transition on the network monitor kicks
//! off an opportunistic full sync. `Limited` gates the automatic
//! triggers exactly like `Disconnected`.

use crate::alert::AlertQuery;
use crate::api::RemoteApi;
use crate::cache::{unix_millis, CacheKind, CachePayload, CacheStore};
use crate::gateway::{FetchOptions, OfflineFirstGateway};
use crate::network::{NetworkMonitor, NetworkStatus, ReachabilityProbe};
use crate::queue::{DrainOutcome, PendingSubmissionQueue};
use crate::storage::StorageBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Broadcast buffer for sync events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timer and batching configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Cadence of unattended full syncs
    pub full_sync_interval: Duration,
    /// Cadence of drain-only passes between full syncs
    pub drain_interval: Duration,
    /// Concurrent outbound refreshes per batch
    pub refresh_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            full_sync_interval: Duration::from_secs(30 * 60),
            drain_interval: Duration::from_secs(5 * 60),
            refresh_batch_size: 3,
        }
    }
}

impl SyncConfig {
    pub fn with_full_sync_interval(mut self, interval: Duration) -> Self {
        self.full_sync_interval = interval;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_refresh_batch_size(mut self, size: usize) -> Self {
        self.refresh_batch_size = size.max(1);
        self
    }
}

/// Phases of a full sync, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    DrainQueue,
    RefreshCache,
    Maintenance,
}

/// Observability events emitted on the sync broadcast channel.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    SyncStarted,
    PhaseStarted(SyncPhase),
    PhaseCompleted(SyncPhase),
    SyncCompleted(SyncResult),
}

/// Outcome of one sync pass.
#[derive(Clone, Debug)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub submissions_uploaded: usize,
    pub submissions_dead_lettered: usize,
    pub entries_refreshed: usize,
    pub entries_failed: usize,
    pub duration: Duration,
}

impl SyncResult {
    fn rejected() -> Self {
        SyncResult {
            success: false,
            message: "already in progress".to_string(),
            submissions_uploaded: 0,
            submissions_dead_lettered: 0,
            entries_refreshed: 0,
            entries_failed: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Aggregate counters across all sync passes.
#[derive(Clone, Debug, Default)]
pub struct SyncStatistics {
    /// Completed sync passes (rejected calls not included)
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Calls rejected because a sync was already running
    pub rejected_syncs: u64,
    /// Unix epoch milliseconds of the last completed pass
    pub last_sync_at_ms: Option<u64>,
}

impl SyncStatistics {
    /// Fraction of completed passes that succeeded, 1.0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            1.0
        } else {
            self.successful_syncs as f64 / self.total_syncs as f64
        }
    }
}

enum RefreshTarget {
    List(AlertQuery),
    One(String),
}

/// Owns the sync lifecycle: timers, the network-transition trigger, and
/// the phase machinery. Construct, [`start`](Self::start), and
/// [`shutdown`](Self::shutdown) explicitly; nothing here is global.
pub struct SyncManager<S, A, P>
where
    S: StorageBackend,
    A: RemoteApi,
    P: ReachabilityProbe,
{
    gateway: Arc<OfflineFirstGateway<S, A, P>>,
    cache: Arc<CacheStore<S>>,
    queue: Arc<PendingSubmissionQueue<S>>,
    network: Arc<NetworkMonitor<P>>,
    config: SyncConfig,
    sync_in_progress: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    stats: Mutex<SyncStatistics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, A, P> SyncManager<S, A, P>
where
    S: StorageBackend + 'static,
    A: RemoteApi + 'static,
    P: ReachabilityProbe + 'static,
{
    pub fn new(
        gateway: Arc<OfflineFirstGateway<S, A, P>>,
        cache: Arc<CacheStore<S>>,
        queue: Arc<PendingSubmissionQueue<S>>,
        network: Arc<NetworkMonitor<P>>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SyncManager {
            gateway,
            cache,
            queue,
            network,
            config,
            sync_in_progress: AtomicBool::new(false),
            events,
            stats: Mutex::new(SyncStatistics::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to [`SyncEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Aggregate counters so far.
    pub fn statistics(&self) -> SyncStatistics {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether a sync pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress.load(Ordering::SeqCst)
    }

    /// Spawn the periodic timers and the network-transition listener.
    ///
    /// Idempotent while running; call [`shutdown`](Self::shutdown) first
    /// to restart with a different config.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            warn!("⚠ SyncManager already started, ignoring");
            return;
        }

        // Coarse timer: unattended full syncs
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let period = this.config.full_sync_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if this.network.is_connected() {
                    debug!("» Periodic full sync starting");
                    let _ = this.force_sync().await;
                }
            }
        }));

        // Short timer: drain-only passes
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let period = this.config.drain_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if this.network.is_connected() && !this.queue.is_empty() {
                    debug!("» Periodic queue drain starting");
                    this.drain_submissions().await;
                }
            }
        }));

        // Connectivity-regained trigger
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut rx = this.network.subscribe();
            loop {
                match rx.recv().await {
                    Ok(NetworkStatus::Connected) => {
                        info!("» Connectivity regained, starting opportunistic sync");
                        let _ = this.force_sync().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Sync trigger lagged {} status updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        info!("✓ SyncManager started");
    }

    /// Abort the timers and the transition listener.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("✓ SyncManager shut down");
    }

    /// Run a full sync now.
    ///
    /// Returns immediately with `success = false` and message
    /// `"already in progress"` when another pass holds the flag. Unlike
    /// the automatic triggers, a forced sync runs regardless of network
    /// status; offline it drains nothing and counts refresh failures.
    pub async fn force_sync(&self) -> SyncResult {
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("✗ Sync rejected: already in progress");
            self.with_stats(|s| s.rejected_syncs += 1);
            return SyncResult::rejected();
        }

        let result = self.run_full_sync().await;
        self.sync_in_progress.store(false, Ordering::SeqCst);

        self.with_stats(|s| {
            s.total_syncs += 1;
            if result.success {
                s.successful_syncs += 1;
            } else {
                s.failed_syncs += 1;
            }
            s.last_sync_at_ms = Some(unix_millis());
        });
        self.emit(SyncEvent::SyncCompleted(result.clone()));
        result
    }

    /// Drain-only pass used by the short timer. Skipped when a full sync
    /// holds the flag.
    pub async fn drain_submissions(&self) -> (usize, usize) {
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return (0, 0);
        }
        let drained = self.drain_loop().await;
        self.sync_in_progress.store(false, Ordering::SeqCst);
        drained
    }

    async fn run_full_sync(&self) -> SyncResult {
        let started = Instant::now();
        info!("» Full sync started");
        self.emit(SyncEvent::SyncStarted);

        self.emit(SyncEvent::PhaseStarted(SyncPhase::DrainQueue));
        let (uploaded, dead_lettered) = self.drain_loop().await;
        self.emit(SyncEvent::PhaseCompleted(SyncPhase::DrainQueue));

        self.emit(SyncEvent::PhaseStarted(SyncPhase::RefreshCache));
        let (refreshed, failed) = self.refresh_cached_entries().await;
        self.emit(SyncEvent::PhaseCompleted(SyncPhase::RefreshCache));

        self.emit(SyncEvent::PhaseStarted(SyncPhase::Maintenance));
        let swept = self.cache.sweep_expired().await;
        let pruned = self.queue.prune_dead_letter().await;
        self.emit(SyncEvent::PhaseCompleted(SyncPhase::Maintenance));

        let duration = started.elapsed();
        info!(
            "✓ Full sync finished in {:?}: {} uploaded, {} dead-lettered, {} refreshed ({} failed), {} swept, {} pruned",
            duration, uploaded, dead_lettered, refreshed, failed, swept, pruned
        );

        SyncResult {
            success: true,
            message: format!(
                "uploaded {}, refreshed {} ({} failed)",
                uploaded, refreshed, failed
            ),
            submissions_uploaded: uploaded,
            submissions_dead_lettered: dead_lettered,
            entries_refreshed: refreshed,
            entries_failed: failed,
            duration,
        }
    }

    /// Phase (a): upload queued writes strictly in order until the queue
    /// is empty or the head stops making progress. Gated per item on
    /// connectivity so an offline pass never burns retry budgets.
    async fn drain_loop(&self) -> (usize, usize) {
        let mut uploaded = 0;
        let mut dead_lettered = 0;

        loop {
            if !self.network.is_connected() {
                break;
            }
            let outcome = self
                .queue
                .drain_one(|submission| self.gateway.upload_pending(submission))
                .await;
            match outcome {
                DrainOutcome::Uploaded(_) => uploaded += 1,
                DrainOutcome::DeadLettered => dead_lettered += 1,
                DrainOutcome::Retried { .. } | DrainOutcome::Empty => break,
            }
        }

        (uploaded, dead_lettered)
    }

    /// Phase (b): re-fetch every cached list and alert in batches of
    /// `refresh_batch_size`, each batch awaited fully before the next.
    /// One entry's failure never aborts the batch or the pass.
    async fn refresh_cached_entries(&self) -> (usize, usize) {
        let mut targets = Vec::new();
        for (_, payload) in self.cache.entries_of_kind(CacheKind::AlertsList).await {
            if let CachePayload::AlertsList(snapshot) = payload {
                targets.push(RefreshTarget::List(snapshot.query));
            }
        }
        for (_, payload) in self.cache.entries_of_kind(CacheKind::SingleAlert).await {
            if let CachePayload::SingleAlert(alert) = payload {
                targets.push(RefreshTarget::One(alert.id));
            }
        }

        let options = FetchOptions::default().force_refresh().no_stale();
        let mut refreshed = 0;
        let mut failed = 0;

        for batch in targets.chunks(self.config.refresh_batch_size) {
            let futures: Vec<_> = batch
                .iter()
                .map(|target| async move {
                    match target {
                        RefreshTarget::List(query) => {
                            self.gateway.get_list(query, options).await.map(|_| ())
                        }
                        RefreshTarget::One(id) => {
                            self.gateway.get_one(id, options).await.map(|_| ())
                        }
                    }
                })
                .collect();

            for result in futures::future::join_all(futures).await {
                match result {
                    Ok(()) => refreshed += 1,
                    Err(e) => {
                        debug!("✗ Refresh failed for one entry: {}", e);
                        failed += 1;
                    }
                }
            }
        }

        (refreshed, failed)
    }

    fn emit(&self, event: SyncEvent) {
        // Send fails only when nobody is subscribed
        let _ = self.events.send(event);
    }

    fn with_stats(&self, f: impl FnOnce(&mut SyncStatistics)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDraft;
    use crate::api::InMemoryRemoteApi;
    use crate::breaker::CircuitBreaker;
    use crate::network::{ConnectivityClass, StaticProbe};
    use crate::retry::{RetryExecutor, RetryPolicy};
    use crate::storage::InMemoryStorage;

    struct Fixture {
        sync: Arc<SyncManager<InMemoryStorage, InMemoryRemoteApi, StaticProbe>>,
        gateway: Arc<OfflineFirstGateway<InMemoryStorage, InMemoryRemoteApi, StaticProbe>>,
        api: Arc<InMemoryRemoteApi>,
        probe: StaticProbe,
        network: Arc<NetworkMonitor<StaticProbe>>,
        queue: Arc<PendingSubmissionQueue<InMemoryStorage>>,
        cache: Arc<CacheStore<InMemoryStorage>>,
    }

    fn fixture_with_config(config: SyncConfig) -> Fixture {
        let cache = Arc::new(CacheStore::new(InMemoryStorage::new()));
        let queue = Arc::new(PendingSubmissionQueue::new(cache.clone()));
        let probe = StaticProbe::reachable();
        let network = Arc::new(NetworkMonitor::new(probe.clone()));
        let api = Arc::new(InMemoryRemoteApi::new());
        let gateway = Arc::new(
            OfflineFirstGateway::new(
                cache.clone(),
                queue.clone(),
                network.clone(),
                Arc::new(RetryExecutor::new()),
                Arc::new(CircuitBreaker::new()),
                api.clone(),
            )
            .with_retry_policy(
                RetryPolicy::default()
                    .with_max_retries(2)
                    .with_base_delay(Duration::from_millis(1)),
            ),
        );
        let sync = Arc::new(SyncManager::new(
            gateway.clone(),
            cache.clone(),
            queue.clone(),
            network.clone(),
            config,
        ));

        Fixture {
            sync,
            gateway,
            api,
            probe,
            network,
            queue,
            cache,
        }
    }

    fn fixture() -> Fixture {
        // Long timers keep the periodic tasks quiet during direct tests
        fixture_with_config(
            SyncConfig::default()
                .with_full_sync_interval(Duration::from_secs(3600))
                .with_drain_interval(Duration::from_secs(3600)),
        )
    }

    fn draft(title: &str) -> AlertDraft {
        AlertDraft {
            title: title.to_string(),
            description: None,
            category: "wildlife".to_string(),
            level: 1,
            latitude: 40.0,
            longitude: -74.0,
        }
    }

    #[tokio::test]
    async fn test_force_sync_drains_then_refreshes() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;

        // A cached list to refresh and a queued write to deliver
        f.api.submit(&draft("existing")).await.expect("Seed failed");
        let query = AlertQuery::near(40.0, -74.0, 50);
        f.gateway
            .get_list(&query, FetchOptions::default())
            .await
            .expect("Fetch should succeed");
        f.queue.enqueue(draft("parked")).await.expect("Enqueue failed");

        let result = f.sync.force_sync().await;

        assert!(result.success);
        assert_eq!(result.submissions_uploaded, 1);
        assert!(result.entries_refreshed >= 1);
        assert_eq!(result.entries_failed, 0);
        assert!(f.queue.is_empty());
        // The queued write made it to the server
        assert_eq!(f.api.len(), 2);
    }

    #[tokio::test]
    async fn test_force_sync_rejected_while_running() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;
        f.queue.enqueue(draft("slow")).await.expect("Enqueue failed");
        f.api.set_latency(Duration::from_millis(150));

        let sync = f.sync.clone();
        let running = tokio::spawn(async move { sync.force_sync().await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let rejected = f.sync.force_sync().await;
        assert!(!rejected.success);
        assert_eq!(rejected.message, "already in progress");

        let finished = running.await.expect("Task should finish");
        assert!(finished.success);
        assert_eq!(f.sync.statistics().rejected_syncs, 1);
    }

    #[tokio::test]
    async fn test_events_cover_all_phases() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;
        let mut rx = f.sync.subscribe();

        f.sync.force_sync().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(SyncEvent::SyncStarted)));
        assert!(matches!(events.last(), Some(SyncEvent::SyncCompleted(_))));
        let phases: Vec<SyncPhase> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::PhaseStarted(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                SyncPhase::DrainQueue,
                SyncPhase::RefreshCache,
                SyncPhase::Maintenance
            ]
        );
    }

    #[tokio::test]
    async fn test_statistics_accumulate() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;

        f.sync.force_sync().await;
        f.sync.force_sync().await;

        let stats = f.sync.statistics();
        assert_eq!(stats.total_syncs, 2);
        assert_eq!(stats.successful_syncs, 2);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(stats.last_sync_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_connected_transition_triggers_sync() {
        let f = fixture();
        f.sync.start();
        f.network.report_connectivity(ConnectivityClass::None).await;
        f.queue.enqueue(draft("parked")).await.expect("Enqueue failed");

        f.network.report_connectivity(ConnectivityClass::Wifi).await;

        // Give the listener task a moment to run the sync
        for _ in 0..50 {
            if f.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.queue.is_empty());
        assert_eq!(f.api.len(), 1);
        f.sync.shutdown();
    }

    #[tokio::test]
    async fn test_limited_does_not_trigger_sync() {
        let f = fixture();
        f.sync.start();
        f.queue.enqueue(draft("parked")).await.expect("Enqueue failed");

        // Link up but probe failing: Limited, gated like Disconnected
        f.probe.set_outcome(Ok(false));
        f.network.report_connectivity(ConnectivityClass::Wifi).await;
        assert_eq!(f.network.status(), NetworkStatus::Limited);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.sync.statistics().total_syncs, 0);
        f.sync.shutdown();
    }

    #[tokio::test]
    async fn test_drain_timer_empties_queue() {
        let f = fixture_with_config(
            SyncConfig::default()
                .with_full_sync_interval(Duration::from_secs(3600))
                .with_drain_interval(Duration::from_millis(50)),
        );
        f.network.report_connectivity(ConnectivityClass::Wifi).await;
        f.queue.enqueue(draft("timed")).await.expect("Enqueue failed");
        f.sync.start();

        for _ in 0..50 {
            if f.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.queue.is_empty());
        f.sync.shutdown();
    }

    #[tokio::test]
    async fn test_offline_force_sync_leaves_queue_intact() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::None).await;
        f.queue.enqueue(draft("parked")).await.expect("Enqueue failed");

        let result = f.sync.force_sync().await;

        // The pass ran, but no uploads were attempted offline
        assert!(result.success);
        assert_eq!(result.submissions_uploaded, 0);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.queue.pending()[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_maintenance_sweeps_expired_entries() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;

        f.cache
            .put(
                "response:categories",
                CachePayload::ApiResponse(serde_json::json!({"categories": []})),
                Some(Duration::from_millis(10)),
            )
            .await
            .expect("Put should succeed");
        tokio::time::sleep(Duration::from_millis(40)).await;

        f.sync.force_sync().await;
        assert_eq!(f.cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_refresh_failures_do_not_abort_sync() {
        let f = fixture();
        f.network.report_connectivity(ConnectivityClass::Wifi).await;

        let query = AlertQuery::near(40.0, -74.0, 50);
        f.gateway
            .get_list(&query, FetchOptions::default())
            .await
            .expect("Fetch should succeed");

        f.api.set_failure(Some(crate::error::Error::Api {
            status: Some(400),
            message: "rejected".to_string(),
        }));
        let result = f.sync.force_sync().await;

        assert!(result.success);
        assert_eq!(result.entries_refreshed, 0);
        assert_eq!(result.entries_failed, 1);
    }
}
