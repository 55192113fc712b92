//! Distributed fixed-window rate limiter.
//!
//! Admission is decided by an atomic increment against the shared counter
//! store, so the same limit is enforced consistently across every service
//! instance. The window is fixed, not sliding: a burst straddling a window
//! boundary can admit up to twice the configured maximum in the worst
//! case, an accepted approximation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::store::CounterStore;

/// Static configuration for one request class. Immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of the fixed counting window.
    pub window: Duration,
    /// Maximum requests admitted per identity per window.
    pub max_requests: u64,
    /// Key prefix scoping this class's counters in the shared store.
    pub key_prefix: String,
    /// Refund successful requests after the fact (count failures only).
    pub skip_successful: bool,
    /// Refund failed requests after the fact (count successes only).
    pub skip_failed: bool,
}

impl RateLimitConfig {
    /// A config with the given window and maximum, no conditional
    /// accounting.
    pub fn new(window: Duration, max_requests: u64, key_prefix: impl Into<String>) -> Self {
        Self {
            window,
            max_requests,
            key_prefix: key_prefix.into(),
            skip_successful: false,
            skip_failed: false,
        }
    }

    fn key_for(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }
}

/// The admission decision for one request, suitable for response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// The configured maximum for this window.
    pub limit: u64,
    /// The identity's post-increment count in the current window.
    pub current: u64,
    /// Remaining quota: `max(0, limit - current)`.
    pub remaining: u64,
    /// When the current window expires and the quota restarts.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// How long the caller should wait before retrying.
    pub fn retry_after(&self) -> Duration {
        (self.reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Quota headers for the response, as name/value pairs.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit".to_string(), self.limit.to_string()),
            ("x-ratelimit-remaining".to_string(), self.remaining.to_string()),
            (
                "x-ratelimit-reset".to_string(),
                self.reset_at.timestamp().to_string(),
            ),
        ];
        if !self.allowed {
            headers.push((
                "retry-after".to_string(),
                self.retry_after().as_secs().max(1).to_string(),
            ));
        }
        headers
    }

    fn fail_open(config: &RateLimitConfig) -> Self {
        Self {
            allowed: true,
            limit: config.max_requests,
            current: 0,
            remaining: config.max_requests,
            reset_at: Utc::now() + config.window,
        }
    }
}

/// Counter-based admission control over a shared store.
///
/// The store is the only cross-instance state; correctness rests entirely
/// on its atomic increment. If the store is unreachable the limiter fails
/// open: a control-plane outage must not become an outage of the service
/// it protects.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Create a limiter over the given counter store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count this request against the identity's window and decide
    /// admission.
    ///
    /// Algorithm: atomically increment `{prefix}:{identity}`; the request
    /// that moves the count 0 -> 1 arms the window's TTL, and later
    /// increments must not rearm it. Counts above `max_requests` are
    /// rejected.
    pub async fn check_and_record(
        &self,
        identity: &str,
        config: &RateLimitConfig,
    ) -> RateLimitDecision {
        let key = config.key_for(identity);

        let count = match self.store.incr(&key).await {
            Ok(count) => count.max(0) as u64,
            Err(err) => {
                warn!(key = %key, error = %err, "Counter store unreachable, failing open");
                return RateLimitDecision::fail_open(config);
            }
        };

        if count == 1 {
            // First request of the window arms the expiry. Two racing
            // first-requests may both land here; the second TTL-set is
            // idempotent for our purposes.
            if let Err(err) = self.store.pexpire(&key, config.window).await {
                warn!(key = %key, error = %err, "Failed to arm window expiry");
            }
        }

        let reset_at = match self.store.pttl(&key).await {
            Ok(Some(ttl)) => Utc::now() + ttl,
            Ok(None) => Utc::now() + config.window,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to read window expiry");
                Utc::now() + config.window
            }
        };

        let allowed = count <= config.max_requests;
        let remaining = config.max_requests.saturating_sub(count);

        if allowed {
            trace!(key = %key, count, remaining, "Request admitted");
        } else {
            debug!(key = %key, count, limit = config.max_requests, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit: config.max_requests,
            current: count,
            remaining,
            reset_at,
        }
    }

    /// Issue a compensating decrement so this request does not count
    /// against the identity's budget.
    ///
    /// Best-effort and non-transactional: under a crash or race the count
    /// can stay transiently inflated, which the window expiry corrects.
    pub async fn uncount(&self, identity: &str, config: &RateLimitConfig) {
        let key = config.key_for(identity);
        match self.store.decr(&key).await {
            Ok(count) => trace!(key = %key, count, "Compensating decrement applied"),
            Err(err) => warn!(key = %key, error = %err, "Compensating decrement failed"),
        }
    }

    /// Administrative clear of one identity's window counter.
    pub async fn clear(&self, identity: &str, config: &RateLimitConfig) -> bool {
        let key = config.key_for(identity);
        match self.store.del(&[key.as_str()]).await {
            Ok(removed) => {
                debug!(key = %key, removed, "Rate limit counter cleared");
                removed > 0
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to clear rate limit counter");
                false
            }
        }
    }

    /// Probe the shared store's liveness.
    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
