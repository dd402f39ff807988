//! Connectivity tracking and reachability probing.
//!
//! Link-layer connectivity (wifi association, cellular attach) does not
//! guarantee internet access: captive portals and dead upstreams produce a
//! link with no route. The [`NetworkMonitor`] therefore combines the OS
//! connectivity feed with an active [`ReachabilityProbe`] and reports one
//! of four [`NetworkStatus`] values, emitting on a broadcast channel only
//! when the status actually changes.

use crate::error::Result;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default deadline for a single reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcast buffer; slow subscribers miss old transitions, never new ones.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Link-layer transport class as reported by the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityClass {
    Wifi,
    Cellular,
    Ethernet,
    /// No link at all
    None,
}

/// Effective network status combining link state and reachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    /// No connectivity report has arrived yet
    Unknown,
    /// Link up and the reachability probe succeeded
    Connected,
    /// Link up but the probe failed or returned non-200 (captive portal,
    /// dead upstream)
    Limited,
    /// No link
    Disconnected,
}

/// Active internet-reachability check.
///
/// Implementations issue a HEAD request against a well-known endpoint and
/// report whether it answered 200. The toolkit bounds every probe with a
/// timeout; implementations need not.
pub trait ReachabilityProbe: Send + Sync + Clone {
    /// `Ok(true)` when the endpoint answered 200, `Ok(false)` on any
    /// other response.
    ///
    /// # Errors
    /// Returns `Err` when no response was obtained at all
    fn probe(&self) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// Scriptable probe for tests and simulators.
#[derive(Clone)]
pub struct StaticProbe {
    outcome: std::sync::Arc<RwLock<Result<bool>>>,
}

impl StaticProbe {
    /// A probe that always reports reachable.
    pub fn reachable() -> Self {
        StaticProbe {
            outcome: std::sync::Arc::new(RwLock::new(Ok(true))),
        }
    }

    /// Change what subsequent probes report.
    pub fn set_outcome(&self, outcome: Result<bool>) {
        if let Ok(mut guard) = self.outcome.write() {
            *guard = outcome;
        }
    }
}

impl ReachabilityProbe for StaticProbe {
    async fn probe(&self) -> Result<bool> {
        match self.outcome.read() {
            Ok(guard) => guard.clone(),
            Err(_) => Ok(false),
        }
    }
}

/// Tracks connectivity and true internet reachability.
///
/// Feed OS connectivity-class changes into
/// [`report_connectivity`](Self::report_connectivity); interested parties
/// consume the deduplicated status stream via [`subscribe`](Self::subscribe)
/// or poll [`status`](Self::status).
pub struct NetworkMonitor<P: ReachabilityProbe> {
    probe: P,
    probe_timeout: Duration,
    status: RwLock<NetworkStatus>,
    last_class: RwLock<Option<ConnectivityClass>>,
    tx: broadcast::Sender<NetworkStatus>,
}

impl<P: ReachabilityProbe> NetworkMonitor<P> {
    /// Create a monitor over the given probe. Status starts `Unknown`.
    pub fn new(probe: P) -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        NetworkMonitor {
            probe,
            probe_timeout: PROBE_TIMEOUT,
            status: RwLock::new(NetworkStatus::Unknown),
            last_class: RwLock::new(None),
            tx,
        }
    }

    /// Override the probe deadline.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Subscribe to status transitions. Only changes are delivered, never
    /// duplicates.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Last known status.
    pub fn status(&self) -> NetworkStatus {
        self.status.read().map(|s| *s).unwrap_or(NetworkStatus::Unknown)
    }

    /// Whether remote calls are worth attempting right now.
    pub fn is_connected(&self) -> bool {
        self.status() == NetworkStatus::Connected
    }

    /// Ingest an OS connectivity-class change and re-derive the status.
    ///
    /// A link-up report triggers a reachability probe to distinguish
    /// `Connected` from `Limited`.
    pub async fn report_connectivity(&self, class: ConnectivityClass) -> NetworkStatus {
        if let Ok(mut guard) = self.last_class.write() {
            *guard = Some(class);
        }

        let status = match class {
            ConnectivityClass::None => NetworkStatus::Disconnected,
            _ => self.probe_status().await,
        };

        self.set_status(status);
        status
    }

    /// On-demand re-check using the last reported connectivity class.
    ///
    /// With no class report yet, the probe alone decides: reachable means
    /// `Connected`, anything else `Disconnected`.
    pub async fn check_now(&self) -> NetworkStatus {
        let last_class = self.last_class.read().ok().and_then(|g| *g);

        let status = match last_class {
            Some(ConnectivityClass::None) => NetworkStatus::Disconnected,
            Some(_) => self.probe_status().await,
            None => match self.probe_status().await {
                NetworkStatus::Connected => NetworkStatus::Connected,
                _ => NetworkStatus::Disconnected,
            },
        };

        self.set_status(status);
        status
    }

    async fn probe_status(&self) -> NetworkStatus {
        let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe()).await;

        match outcome {
            Ok(Ok(true)) => NetworkStatus::Connected,
            Ok(Ok(false)) => {
                debug!("✗ Reachability probe returned non-200, status Limited");
                NetworkStatus::Limited
            }
            Ok(Err(e)) => {
                debug!("✗ Reachability probe failed ({}), status Limited", e);
                NetworkStatus::Limited
            }
            Err(_) => {
                debug!("✗ Reachability probe timed out, status Limited");
                NetworkStatus::Limited
            }
        }
    }

    fn set_status(&self, status: NetworkStatus) {
        let changed = match self.status.write() {
            Ok(mut guard) => {
                let changed = *guard != status;
                *guard = status;
                changed
            }
            Err(_) => false,
        };

        if changed {
            info!("» Network status changed to {:?}", status);
            // Send fails only when nobody is subscribed
            let _ = self.tx.send(status);
        }
    }
}
