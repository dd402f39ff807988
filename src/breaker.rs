//! Per-operation circuit breaking.
//!
//! Each operation name gets its own breaker: `threshold` consecutive
//! failures open it, an open breaker rejects calls immediately with
//! [`Error::CircuitOpen`] (without running the wrapped operation), and
//! after `reset_timeout` a single half-open trial call decides whether to
//! close it again. Every wrapped call is bounded by a timeout; an elapsed
//! timeout counts as a failure.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// Breaker state for one operation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls are rejected without running the operation
    Open,
    /// Exactly one trial call is allowed through
    HalfOpen,
}

/// Tunable thresholds for one breaker.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Deadline applied to every wrapped call
    pub call_timeout: Duration,
    /// How long an open breaker waits before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            call_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// True while the single half-open trial call is in flight
    trial_in_flight: bool,
    config: BreakerConfig,
}

impl BreakerEntry {
    fn new(config: BreakerConfig) -> Self {
        BreakerEntry {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            trial_in_flight: false,
            config,
        }
    }
}

/// Diagnostic snapshot of one breaker.
#[derive(Clone, Debug)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Registry of circuit breakers keyed by operation name.
///
/// # Example
///
/// ```no_run
/// use offline_kit::breaker::CircuitBreaker;
///
/// # async fn fetch() -> offline_kit::Result<u32> { Ok(5) }
/// #[tokio::main]
/// async fn main() -> offline_kit::Result<()> {
///     let breaker = CircuitBreaker::new();
///     let value = breaker.call("fetch_alerts", fetch()).await?;
///     assert_eq!(value, 5);
///     Ok(())
/// }
/// ```
pub struct CircuitBreaker {
    default_config: BreakerConfig,
    entries: DashMap<String, BreakerEntry>,
}

impl CircuitBreaker {
    /// Create a registry with default thresholds for every operation.
    pub fn new() -> Self {
        Self::with_config(BreakerConfig::default())
    }

    /// Create a registry with custom default thresholds.
    pub fn with_config(config: BreakerConfig) -> Self {
        CircuitBreaker {
            default_config: config,
            entries: DashMap::new(),
        }
    }

    /// Override thresholds for one operation name.
    pub fn configure(&self, operation_name: &str, config: BreakerConfig) {
        self.entries
            .insert(operation_name.to_string(), BreakerEntry::new(config));
    }

    /// Run `operation` under this breaker.
    ///
    /// Rejected immediately with [`Error::CircuitOpen`] while open (the
    /// operation future is dropped unpolled). Otherwise the call runs
    /// bounded by the configured timeout; an elapsed deadline counts as a
    /// failure and surfaces as [`Error::ConnectionTimeout`].
    pub async fn call<T, Fut>(&self, operation_name: &str, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let call_timeout = self.admit(operation_name)?;

        let outcome = tokio::time::timeout(call_timeout, operation).await;

        match outcome {
            Ok(Ok(value)) => {
                self.on_success(operation_name);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(operation_name);
                Err(e)
            }
            Err(_) => {
                self.on_failure(operation_name);
                Err(Error::ConnectionTimeout(format!(
                    "operation '{}' exceeded {:?}",
                    operation_name, call_timeout
                )))
            }
        }
    }

    /// Current state for an operation name.
    pub fn state(&self, operation_name: &str) -> CircuitState {
        self.entries
            .get(operation_name)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Diagnostic snapshot for an operation name.
    pub fn snapshot(&self, operation_name: &str) -> BreakerSnapshot {
        self.entries
            .get(operation_name)
            .map(|e| BreakerSnapshot {
                state: e.state,
                failure_count: e.failure_count,
            })
            .unwrap_or(BreakerSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
            })
    }

    /// Force a breaker back to closed with a clean slate.
    pub fn reset(&self, operation_name: &str) {
        if let Some(mut entry) = self.entries.get_mut(operation_name) {
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.last_failure_at = None;
            entry.trial_in_flight = false;
        }
    }

    /// Decide whether a call may proceed; returns the call timeout to
    /// apply. The entry lock is released before any await point.
    fn admit(&self, operation_name: &str) -> Result<Duration> {
        let mut entry = self
            .entries
            .entry(operation_name.to_string())
            .or_insert_with(|| BreakerEntry::new(self.default_config.clone()));

        match entry.state {
            CircuitState::Closed => Ok(entry.config.call_timeout),
            CircuitState::Open => {
                let cooled_down = entry
                    .last_failure_at
                    .is_some_and(|at| at.elapsed() > entry.config.reset_timeout);
                if cooled_down {
                    info!(
                        "» Circuit '{}' half-open after cooldown, allowing trial call",
                        operation_name
                    );
                    entry.state = CircuitState::HalfOpen;
                    entry.failure_count = 0;
                    entry.trial_in_flight = true;
                    Ok(entry.config.call_timeout)
                } else {
                    debug!("✗ Circuit '{}' open, rejecting call", operation_name);
                    Err(Error::CircuitOpen {
                        operation: operation_name.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if entry.trial_in_flight {
                    // Only one trial probes the remote at a time
                    Err(Error::CircuitOpen {
                        operation: operation_name.to_string(),
                    })
                } else {
                    entry.trial_in_flight = true;
                    Ok(entry.config.call_timeout)
                }
            }
        }
    }

    fn on_success(&self, operation_name: &str) {
        if let Some(mut entry) = self.entries.get_mut(operation_name) {
            if entry.state == CircuitState::HalfOpen {
                info!("✓ Circuit '{}' closed after successful trial", operation_name);
            }
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.trial_in_flight = false;
        }
    }

    fn on_failure(&self, operation_name: &str) {
        if let Some(mut entry) = self.entries.get_mut(operation_name) {
            match entry.state {
                CircuitState::HalfOpen => {
                    warn!("⚠ Circuit '{}' reopened: trial call failed", operation_name);
                    entry.state = CircuitState::Open;
                    entry.last_failure_at = Some(Instant::now());
                    entry.trial_in_flight = false;
                }
                _ => {
                    entry.failure_count += 1;
                    if entry.failure_count >= entry.config.failure_threshold {
                        warn!(
                            "⚠ Circuit '{}' opened after {} consecutive failures",
                            operation_name, entry.failure_count
                        );
                        entry.state = CircuitState::Open;
                        entry.last_failure_at = Some(Instant::now());
                    }
                }
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing() -> impl Future<Output = Result<u32>> {
        async {
            Err(Error::Api {
                status: Some(500),
                message: "boom".to_string(),
            })
        }
    }

    fn test_config() -> BreakerConfig {
        BreakerConfig::default()
            .with_failure_threshold(3)
            .with_reset_timeout(Duration::from_millis(50))
            .with_call_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_threshold_opens_circuit() {
        let breaker = CircuitBreaker::with_config(test_config());

        for _ in 0..3 {
            let _ = breaker.call("op", failing()).await;
        }

        assert_eq!(breaker.state("op"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::with_config(test_config());
        for _ in 0..3 {
            let _ = breaker.call("op", failing()).await;
        }

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let result = breaker
            .call("op", async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(1)
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::with_config(test_config());
        for _ in 0..3 {
            let _ = breaker.call("op", failing()).await;
        }
        assert_eq!(breaker.state("op"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = breaker.call("op", async { Ok::<_, Error>(9) }).await;
        assert_eq!(result.expect("Trial should pass through"), 9);
        assert_eq!(breaker.state("op"), CircuitState::Closed);
        assert_eq!(breaker.snapshot("op").failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::with_config(test_config());
        for _ in 0..3 {
            let _ = breaker.call("op", failing()).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = breaker.call("op", failing()).await;
        assert!(result.is_err());
        assert_eq!(breaker.state("op"), CircuitState::Open);

        // Reopened breaker rejects again until the next cooldown
        let result = breaker.call("op", async { Ok::<_, Error>(1) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::with_config(
            test_config().with_call_timeout(Duration::from_millis(20)),
        );

        let result = breaker
            .call("op", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, Error>(1)
            })
            .await;

        assert!(matches!(result, Err(Error::ConnectionTimeout(_))));
        assert_eq!(breaker.snapshot("op").failure_count, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::with_config(test_config());

        let _ = breaker.call("op", failing()).await;
        let _ = breaker.call("op", failing()).await;
        assert_eq!(breaker.snapshot("op").failure_count, 2);

        let _ = breaker.call("op", async { Ok::<_, Error>(1) }).await;
        assert_eq!(breaker.snapshot("op").failure_count, 0);
        assert_eq!(breaker.state("op"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_operations_are_independent() {
        let breaker = CircuitBreaker::with_config(test_config());

        for _ in 0..3 {
            let _ = breaker.call("flaky", failing()).await;
        }

        assert_eq!(breaker.state("flaky"), CircuitState::Open);
        assert_eq!(breaker.state("healthy"), CircuitState::Closed);

        let result = breaker.call("healthy", async { Ok::<_, Error>(1) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_per_operation_config_override() {
        let breaker = CircuitBreaker::with_config(test_config());
        breaker.configure("fragile", test_config().with_failure_threshold(1));

        let _ = breaker.call("fragile", failing()).await;
        assert_eq!(breaker.state("fragile"), CircuitState::Open);

        let _ = breaker.call("other", failing()).await;
        assert_eq!(breaker.state("other"), CircuitState::Closed);
    }
}
