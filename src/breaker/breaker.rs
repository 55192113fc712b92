//! Circuit breaker implementation.
//!
//! One breaker guards one class of external dependency call. It bounds call
//! latency with a timeout, tracks consecutive failures and successes, and
//! short-circuits calls while the dependency is considered unhealthy.
//!
//! Breaker state is process-local by design: each service instance learns
//! independently that a dependency is unhealthy. Only rate-limit counters
//! are shared across instances (see [`crate::store`]).

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BoxError, BreakerError};

use super::state::{BreakerSnapshot, BreakerStats, CircuitState};

/// Configuration for a single circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the breaker closes.
    pub success_threshold: u32,
    /// Maximum time a wrapped call may take before it is recorded as a
    /// timeout failure.
    pub call_timeout: Duration,
    /// How long an open breaker rejects calls before admitting a trial.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            call_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Mutable per-breaker state, guarded by one mutex.
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Set only on entering Open, cleared on leaving it.
    opened_until: Option<Instant>,
    stats: BreakerStats,
}

/// A three-state circuit breaker guarding one async dependency.
///
/// Thread-safe: many calls may be in flight concurrently, and each call's
/// outcome is accounted exactly once. The relative ordering of concurrent
/// updates is unspecified, and half-open trial admission is deliberately
/// not single-flight: more than `success_threshold` trials can be admitted
/// before every caller observes the closed transition.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_until: None,
                stats: BreakerStats::default(),
            }),
        }
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation through the breaker.
    ///
    /// The operation future is spawned as a task and raced against the
    /// configured call timeout. On timeout the task is left running
    /// detached and its eventual outcome is logged at debug level, never
    /// re-awaited; wrapped operations must therefore be idempotent or
    /// tolerant of completing after the caller has moved on.
    ///
    /// Returns the operation's value, or a [`BreakerError`] distinguishing
    /// a short-circuit rejection from a genuine dependency failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        if let Err(retry_in) = self.try_admit() {
            debug!(breaker = %self.name, retry_in = ?retry_in, "Short-circuiting call");
            return Err(BreakerError::CircuitOpen {
                breaker: self.name.clone(),
                retry_in,
            });
        }

        let mut handle = tokio::spawn(operation());
        match tokio::time::timeout(self.config.call_timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => {
                self.record_success();
                Ok(value)
            }
            Ok(Ok(Err(source))) => {
                self.record_failure(false);
                Err(BreakerError::Dependency {
                    breaker: self.name.clone(),
                    source,
                })
            }
            Ok(Err(join_err)) => {
                // The spawned operation panicked; count it like any failure.
                self.record_failure(false);
                Err(BreakerError::Dependency {
                    breaker: self.name.clone(),
                    source: Box::new(join_err),
                })
            }
            Err(_elapsed) => {
                self.record_failure(true);

                // The timeout cancels only the wait. The operation keeps
                // running in the background; log how it eventually ended.
                let name = self.name.clone();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(_)) => {
                            debug!(breaker = %name, "Abandoned call eventually succeeded")
                        }
                        Ok(Err(err)) => {
                            debug!(breaker = %name, error = %err, "Abandoned call eventually failed")
                        }
                        Err(_) => {}
                    }
                });

                Err(BreakerError::Timeout {
                    breaker: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Execute an operation, recovering any breaker error with a fallback.
    ///
    /// The fallback runs when the breaker is open, when the operation
    /// fails, or when it times out. It is awaited inline (not spawned) and
    /// its value is returned directly.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        operation: F,
        fallback: FB,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        match self.execute(operation).await {
            Ok(value) => value,
            Err(err) => {
                debug!(breaker = %self.name, error = %err, "Recovering with fallback");
                fallback().await
            }
        }
    }

    /// Force the breaker closed with zeroed streak counters.
    ///
    /// Cumulative statistics are preserved.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(breaker = %self.name, "Manually resetting circuit breaker");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_until = None;
    }

    /// Force the breaker open with a freshly computed reset deadline.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        warn!(breaker = %self.name, "Manually forcing circuit breaker open");
        inner.state = CircuitState::Open;
        inner.opened_until = Some(Instant::now() + self.config.reset_timeout);
        inner.consecutive_successes = 0;
    }

    /// Point-in-time snapshot of state and statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let open_remaining_ms = match inner.state {
            CircuitState::Open => inner.opened_until.map(|until| {
                until.saturating_duration_since(Instant::now()).as_millis() as u64
            }),
            _ => None,
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            open_remaining_ms,
            stats: inner.stats.clone(),
        }
    }

    /// Decide whether a call may proceed, transitioning Open -> HalfOpen
    /// when the reset deadline has passed (the current call becomes the
    /// first trial). Returns the remaining open time on rejection.
    fn try_admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        inner.stats.total_requests += 1;

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                let until = inner.opened_until.unwrap_or(now);
                if now >= until {
                    info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_until = None;
                    inner.consecutive_successes = 0;
                    Ok(())
                } else {
                    inner.stats.rejected += 1;
                    Err(until - now)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.stats.successes += 1;
        inner.stats.last_success_at = Some(Utc::now());
        inner.consecutive_failures = 0;

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!(breaker = %self.name, "Circuit breaker closing after successful recovery");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {
                // A trial admitted before the breaker reopened finished
                // late; the streak reset above is the only effect.
                warn!(breaker = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, timed_out: bool) {
        let mut inner = self.inner.lock();
        if timed_out {
            inner.stats.timeouts += 1;
        } else {
            inner.stats.failures += 1;
        }
        inner.stats.last_failure_at = Some(Utc::now());
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_until = Some(Instant::now() + self.config.reset_timeout);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker reopening after failed trial");
                inner.state = CircuitState::Open;
                inner.opened_until = Some(Instant::now() + self.config.reset_timeout);
            }
            CircuitState::Open => {
                // Late trial result. The open deadline is set only on
                // entering Open, so it is not refreshed here.
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            call_timeout: Duration::from_millis(50),
            reset_timeout: Duration::from_millis(100),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let result: Result<(), _> = breaker
            .execute(|| async { Err::<(), _>("dependency error".into()) })
            .await;
        assert!(result.is_err());
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let result = breaker.execute(|| async { Ok::<_, crate::error::BoxError>(1) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let breaker = CircuitBreaker::new("datastore", fast_config());

        let value = breaker
            .execute(|| async { Ok::<_, crate::error::BoxError>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().stats.successes, 1);
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("datastore", fast_config());

        for _ in 0..3 {
            fail(&breaker).await;
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.consecutive_failures, 3);
        assert!(snapshot.open_remaining_ms.is_some());
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_operation() {
        let breaker = CircuitBreaker::new("datastore", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let result = breaker
            .execute(move || async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, crate::error::BoxError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.snapshot().stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("datastore", fast_config());

        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;

        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);

        // The streak starts over; two more failures do not open the circuit.
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_reset_timeout_and_call_attempted() {
        let breaker = CircuitBreaker::new("datastore", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = invoked.clone();
        let result = breaker
            .execute(move || async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, crate::error::BoxError>(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(invoked.load(Ordering::SeqCst), 1, "trial call must be attempted");
        // One success with success_threshold=2 keeps the breaker half-open.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_deadline() {
        let breaker = CircuitBreaker::new("datastore", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        fail(&breaker).await; // trial fails

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_successes, 0);
        // Fresh deadline: most of the reset timeout remains.
        assert!(snapshot.open_remaining_ms.unwrap() > 50);
    }

    #[tokio::test]
    async fn test_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("datastore", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_timeout_counted_once_and_reported() {
        let breaker = CircuitBreaker::new("mail", fast_config());

        // Resolves at twice the call timeout.
        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, crate::error::BoxError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.stats.timeouts, 1);
        assert_eq!(snapshot.stats.failures, 0);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_fallback_runs_when_open() {
        let breaker = CircuitBreaker::new("cache", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let value = breaker
            .execute_with_fallback(
                || async { Ok::<_, crate::error::BoxError>("live") },
                || async { "cached" },
            )
            .await;

        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_fallback_runs_on_dependency_failure() {
        let breaker = CircuitBreaker::new("cache", fast_config());

        let value = breaker
            .execute_with_fallback(
                || async { Err::<&str, _>("boom".into()) },
                || async { "cached" },
            )
            .await;

        assert_eq!(value, "cached");
        assert_eq!(breaker.snapshot().stats.failures, 1);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::new("payments", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
        // Stats survive an administrative reset.
        assert_eq!(snapshot.stats.failures, 3);
    }

    #[tokio::test]
    async fn test_force_open_rejects_immediately() {
        let breaker = CircuitBreaker::new("payments", fast_config());

        breaker.force_open();

        let result = breaker
            .execute(|| async { Ok::<_, crate::error::BoxError>(()) })
            .await;
        assert!(matches!(result, Err(BreakerError::CircuitOpen { .. })));
        assert!(breaker.snapshot().open_remaining_ms.is_some());
    }

    #[tokio::test]
    async fn test_stats_account_every_call_exactly_once() {
        let breaker = CircuitBreaker::new("object-storage", fast_config());

        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await; // opens
        fail(&breaker).await; // rejected, not attempted

        let stats = breaker.snapshot().stats;
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.rejected, 1);
        assert!(stats.last_failure_at.is_some());
        assert!(stats.last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_calls_each_accounted() {
        let breaker = Arc::new(CircuitBreaker::new("datastore", BreakerConfig {
            failure_threshold: 100,
            ..fast_config()
        }));

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move {
                let result = breaker
                    .execute(move || async move {
                        if i % 2 == 0 {
                            Ok(i)
                        } else {
                            Err::<u32, crate::error::BoxError>("odd".into())
                        }
                    })
                    .await;
                result.is_ok()
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() {
                ok += 1;
            }
        }

        let stats = breaker.snapshot().stats;
        assert_eq!(ok, 10);
        assert_eq!(stats.total_requests, 20);
        assert_eq!(stats.successes, 10);
        assert_eq!(stats.failures, 10);
    }
}
