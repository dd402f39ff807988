//! Retry execution with exponential backoff and additive jitter.
//!
//! [`RetryExecutor`] wraps a fallible async operation and re-runs it per a
//! [`RetryPolicy`]: transient failures (timeouts, resets, 5xx, 429) are
//! retried with exponentially growing, jittered delays; everything else
//! surfaces to the caller on the first failure. Per-operation-name metrics
//! accumulate for diagnostics only and never influence behavior.

use crate::error::{Error, ErrorKind, Result};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

/// Immutable retry policy value object.
///
/// `max_retries` bounds the total attempt count: the attempt counter
/// starts at 1 and a failure is only retried while `attempt < max_retries`.
///
/// # Presets
///
/// ```
/// use offline_kit::retry::RetryPolicy;
///
/// let _p = RetryPolicy::default();       // balanced
/// let _p = RetryPolicy::conservative();  // few, widely spaced attempts
/// let _p = RetryPolicy::aggressive();    // many, tightly spaced attempts
/// let _p = RetryPolicy::quick();         // one fast retry, UI-facing calls
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempt budget (first try included)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap applied to the computed delay, before jitter
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Additive jitter as a fraction of the computed delay, in [0, 1]
    pub jitter_fraction: f64,
    /// HTTP status codes considered transient
    pub retryable_status_codes: HashSet<u16>,
    /// Transport error kinds considered transient
    pub retryable_error_kinds: HashSet<ErrorKind>,
}

fn transient_status_codes() -> HashSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

fn transient_error_kinds() -> HashSet<ErrorKind> {
    [ErrorKind::Timeout, ErrorKind::ConnectionReset]
        .into_iter()
        .collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            retryable_status_codes: transient_status_codes(),
            retryable_error_kinds: transient_error_kinds(),
        }
    }
}

impl RetryPolicy {
    /// Few attempts, widely spaced. For heavyweight or rate-limited calls.
    pub fn conservative() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            ..Default::default()
        }
    }

    /// Many attempts, tightly spaced. For the background sync path where
    /// latency is invisible and success matters.
    pub fn aggressive() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 1.5,
            ..Default::default()
        }
    }

    /// One fast retry. For interactive calls where the user is waiting.
    pub fn quick() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Override the attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Override the jitter fraction.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Whether this error is worth another attempt under this policy.
    ///
    /// The attempt budget is checked separately by the executor.
    pub fn is_retryable(&self, error: &Error) -> bool {
        if let Some(status) = error.status_code() {
            if self.retryable_status_codes.contains(&status) {
                return true;
            }
        }
        self.retryable_error_kinds.contains(&error.kind())
    }

    /// Backoff delay for a 1-based attempt number, before jitter.
    ///
    /// `min(base_delay * backoff_multiplier^(attempt-1), max_delay)` —
    /// non-decreasing in `attempt` up to the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Jittered delay for a 1-based attempt number.
    ///
    /// Jitter only adds (never subtracts), so the computed backoff is a
    /// floor: `delay + delay * jitter_fraction * random[0, 1)`.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let jitter = delay.mul_f64(self.jitter_fraction * rand::random::<f64>());
        delay + jitter
    }
}

/// Per-operation-name counters, diagnostics only.
#[derive(Clone, Debug, Default)]
pub struct OperationMetrics {
    pub total_attempts: u64,
    pub total_retries: u64,
    pub successes: u64,
    pub failures: u64,
    /// Unix epoch milliseconds of the last success
    pub last_success_ms: Option<u64>,
    /// Unix epoch milliseconds of the last exhausted/terminal failure
    pub last_failure_ms: Option<u64>,
}

/// Executes operations under a [`RetryPolicy`], accumulating per-name
/// metrics.
///
/// # Example
///
/// ```no_run
/// use offline_kit::retry::{RetryExecutor, RetryPolicy};
///
/// # async fn fetch() -> offline_kit::Result<u32> { Ok(5) }
/// #[tokio::main]
/// async fn main() -> offline_kit::Result<()> {
///     let executor = RetryExecutor::new();
///     let count = executor
///         .execute_with_retry("fetch_alerts", fetch, &RetryPolicy::default())
///         .await?;
///     assert_eq!(count, 5);
///     Ok(())
/// }
/// ```
pub struct RetryExecutor {
    metrics: DashMap<String, OperationMetrics>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        RetryExecutor {
            metrics: DashMap::new(),
        }
    }

    /// Run `operation`, retrying transient failures per `policy`.
    ///
    /// Returns the first success, or the last classified error once the
    /// attempt budget is exhausted or a non-retryable error appears.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        operation: F,
        policy: &RetryPolicy,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;

        loop {
            self.record_attempt(operation_name);

            match operation().await {
                Ok(value) => {
                    self.record_success(operation_name);
                    if attempt > 1 {
                        info!(
                            "✓ Operation '{}' succeeded on attempt {}",
                            operation_name, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let retryable = attempt < policy.max_retries && policy.is_retryable(&e);
                    if !retryable {
                        self.record_failure(operation_name);
                        debug!(
                            "✗ Operation '{}' failed on attempt {} ({}), giving up",
                            operation_name, attempt, e
                        );
                        return Err(e);
                    }

                    let delay = policy.jittered_delay_for_attempt(attempt);
                    debug!(
                        "Operation '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        operation_name, attempt, policy.max_retries, delay, e
                    );
                    self.record_retry(operation_name);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Metrics for one operation name, if it has ever run.
    pub fn metrics(&self, operation_name: &str) -> Option<OperationMetrics> {
        self.metrics.get(operation_name).map(|m| m.clone())
    }

    /// Snapshot of every operation's metrics.
    pub fn metrics_snapshot(&self) -> HashMap<String, OperationMetrics> {
        self.metrics
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn record_attempt(&self, name: &str) {
        self.metrics.entry(name.to_string()).or_default().total_attempts += 1;
    }

    fn record_retry(&self, name: &str) {
        self.metrics.entry(name.to_string()).or_default().total_retries += 1;
    }

    fn record_success(&self, name: &str) {
        let mut m = self.metrics.entry(name.to_string()).or_default();
        m.successes += 1;
        m.last_success_ms = Some(crate::cache::unix_millis());
    }

    fn record_failure(&self, name: &str) {
        let mut m = self.metrics.entry(name.to_string()).or_default();
        m.failures += 1;
        m.last_failure_ms = Some(crate::cache::unix_millis());
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
