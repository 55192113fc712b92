//! Request adapter: the thin glue between the web layer and the
//! traffic-control primitives.
//!
//! An inbound request passes rate-limit admission first; if admitted,
//! business logic runs and wraps each outbound dependency call with the
//! matching circuit breaker from the registry.

use std::sync::Arc;

use tracing::warn;

use crate::breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker};
use crate::error::BreakerError;
use crate::ratelimit::{
    PresetCatalog, RateLimitDecision, RateLimiter, RejectionResponse, RequestMeta,
};
use crate::store::CounterStore;

/// An admitted request: what the middleware needs to finish the exchange.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The preset that admitted the request.
    pub preset: String,
    /// The identity the request was counted against.
    pub identity: String,
    /// The admission decision, including quota header values.
    pub decision: RateLimitDecision,
}

impl Admission {
    /// Quota headers for the response.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.decision.headers()
    }
}

/// Long-lived context owning the breaker registry, the rate limiter and
/// the preset catalog.
///
/// Explicitly constructed rather than ambient, so tests can build isolated
/// instances over their own stores.
pub struct RequestGuard {
    registry: BreakerRegistry,
    limiter: RateLimiter,
    presets: PresetCatalog,
}

impl RequestGuard {
    /// Assemble a guard from its parts.
    pub fn new(registry: BreakerRegistry, limiter: RateLimiter, presets: PresetCatalog) -> Self {
        Self {
            registry,
            limiter,
            presets,
        }
    }

    /// A guard with default breakers and the standard preset catalog over
    /// the given counter store.
    pub fn with_defaults(store: Arc<dyn CounterStore>) -> Self {
        Self::new(
            BreakerRegistry::with_defaults(),
            RateLimiter::new(store),
            PresetCatalog::standard(),
        )
    }

    /// Decide admission for a request under the named preset.
    ///
    /// Runs before any business logic. An unknown preset name is a wiring
    /// mistake in the caller and is resolved fail-open with a warning, the
    /// same posture taken for a store outage.
    pub async fn admit(
        &self,
        preset_name: &str,
        request: &RequestMeta,
    ) -> Result<Admission, RejectionResponse> {
        let Some(preset) = self.presets.get(preset_name) else {
            warn!(preset = %preset_name, "Unknown rate-limit preset, admitting request");
            return Ok(Admission {
                preset: preset_name.to_string(),
                identity: String::new(),
                decision: RateLimitDecision {
                    allowed: true,
                    limit: 0,
                    current: 0,
                    remaining: 0,
                    reset_at: chrono::Utc::now(),
                },
            });
        };

        let identity = preset.strategy.identity(request);
        let decision = self.limiter.check_and_record(&identity, &preset.config).await;

        if decision.allowed {
            Ok(Admission {
                preset: preset_name.to_string(),
                identity,
                decision,
            })
        } else {
            Err(preset.rejection(&decision))
        }
    }

    /// Apply the preset's conditional accounting once the request outcome
    /// is known: matching requests are refunded with a compensating
    /// decrement.
    pub async fn settle(&self, admission: &Admission, success: bool) {
        let Some(preset) = self.presets.get(&admission.preset) else {
            return;
        };
        if admission.identity.is_empty() {
            return;
        }

        let refund = (success && preset.config.skip_successful)
            || (!success && preset.config.skip_failed);
        if refund {
            self.limiter.uncount(&admission.identity, &preset.config).await;
        }
    }

    /// The breaker guarding the named dependency class.
    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.registry.get(name)
    }

    /// Map an unrecovered breaker error to the client-facing rejection.
    ///
    /// An open circuit becomes "temporarily unavailable"; an exhausted
    /// dependency failure becomes a generic failure with no internal
    /// detail.
    pub fn unavailable(err: &BreakerError) -> RejectionResponse {
        match err {
            BreakerError::CircuitOpen { retry_in, .. } => {
                let mut rejection = RejectionResponse::temporarily_unavailable();
                rejection.retry_after_secs = Some(retry_in.as_secs().max(1));
                rejection
            }
            BreakerError::Timeout { .. } | BreakerError::Dependency { .. } => RejectionResponse {
                status: 500,
                error: "dependency_failure".to_string(),
                message: "Request could not be completed".to_string(),
                retry_after_secs: None,
            },
        }
    }

    /// Observability snapshot of every breaker.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.registry.snapshot()
    }

    /// Probe the shared counter store.
    pub async fn store_healthy(&self) -> bool {
        self.limiter.store_healthy().await
    }

    /// Administrative: force one breaker closed.
    pub fn reset_breaker(&self, name: &str) -> bool {
        self.registry.reset(name)
    }

    /// Administrative: force one breaker open.
    pub fn force_open_breaker(&self, name: &str) -> bool {
        self.registry.force_open(name)
    }

    /// Administrative: force every breaker closed.
    pub fn reset_all_breakers(&self) {
        self.registry.reset_all();
    }

    /// Administrative: clear one identity's counter under a preset.
    pub async fn clear_limit(&self, preset_name: &str, identity: &str) -> bool {
        match self.presets.get(preset_name) {
            Some(preset) => self.limiter.clear(identity, &preset.config).await,
            None => false,
        }
    }

    /// The preset catalog in use.
    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }
}

impl std::fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::store::MemoryCounterStore;
    use std::net::IpAddr;
    use std::time::Duration;

    fn guard() -> RequestGuard {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        RequestGuard::with_defaults(Arc::new(MemoryCounterStore::new()))
    }

    fn addr() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_admit_then_reject_over_budget() {
        let guard = guard();
        let request = RequestMeta::authenticated("tenant-1", addr());

        for _ in 0..10 {
            let admission = guard.admit("reports", &request).await.unwrap();
            assert_eq!(admission.preset, "reports");
            assert_eq!(admission.identity, "tenant-1");
        }

        let rejection = guard.admit("reports", &request).await.unwrap_err();
        assert_eq!(rejection.status, 429);
        assert_eq!(rejection.error, "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn test_admission_carries_quota_headers() {
        let guard = guard();
        let request = RequestMeta::anonymous(addr());

        let admission = guard.admit("browse", &request).await.unwrap();
        let headers = admission.headers();

        assert!(headers
            .iter()
            .any(|(name, value)| name == "x-ratelimit-limit" && value == "120"));
        assert!(headers.iter().any(|(name, _)| name == "x-ratelimit-remaining"));
    }

    #[tokio::test]
    async fn test_settle_refunds_successful_auth_attempts() {
        let guard = guard();
        let request = RequestMeta::anonymous(addr());

        // Five successful logins, refunded; the sixth attempt is admitted.
        for _ in 0..5 {
            let admission = guard.admit("auth", &request).await.unwrap();
            guard.settle(&admission, true).await;
        }
        assert!(guard.admit("auth", &request).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_auth_attempts_consume_budget() {
        let guard = guard();
        let request = RequestMeta::anonymous(addr());

        for _ in 0..5 {
            let admission = guard.admit("auth", &request).await.unwrap();
            guard.settle(&admission, false).await;
        }

        let rejection = guard.admit("auth", &request).await.unwrap_err();
        assert_eq!(rejection.error, "too_many_attempts");
    }

    #[tokio::test]
    async fn test_unknown_preset_fails_open() {
        let guard = guard();
        let request = RequestMeta::anonymous(addr());

        let admission = guard.admit("no-such-preset", &request).await.unwrap();
        assert!(admission.decision.allowed);
    }

    #[tokio::test]
    async fn test_breaker_wiring() {
        let guard = guard();

        let breaker = guard.breaker("datastore").unwrap();
        let value = breaker
            .execute(|| async { Ok::<_, crate::error::BoxError>("row") })
            .await
            .unwrap();
        assert_eq!(value, "row");

        assert!(guard.breaker("unknown").is_none());
    }

    #[tokio::test]
    async fn test_open_circuit_maps_to_unavailable() {
        let err = BreakerError::CircuitOpen {
            breaker: "payments".to_string(),
            retry_in: Duration::from_secs(30),
        };

        let rejection = RequestGuard::unavailable(&err);
        assert_eq!(rejection.status, 503);
        assert_eq!(rejection.error, "temporarily_unavailable");
        assert_eq!(rejection.retry_after_secs, Some(30));
    }

    #[tokio::test]
    async fn test_dependency_failure_maps_to_generic_error() {
        let err = BreakerError::Dependency {
            breaker: "datastore".to_string(),
            source: "pg: relation does not exist".into(),
        };

        let rejection = RequestGuard::unavailable(&err);
        assert_eq!(rejection.status, 500);
        // No internal detail leaks into the message.
        assert!(!rejection.message.contains("pg:"));
    }

    #[tokio::test]
    async fn test_admin_surface() {
        let guard = guard();
        let request = RequestMeta::authenticated("tenant-1", addr());

        guard.force_open_breaker("cache");
        assert_eq!(
            guard.breaker("cache").unwrap().state(),
            CircuitState::Open
        );
        guard.reset_all_breakers();
        assert_eq!(
            guard.breaker("cache").unwrap().state(),
            CircuitState::Closed
        );

        // Exhaust then clear a rate limit.
        for _ in 0..10 {
            let _ = guard.admit("reports", &request).await;
        }
        assert!(guard.admit("reports", &request).await.is_err());
        assert!(guard.clear_limit("reports", "tenant-1").await);
        assert!(guard.admit("reports", &request).await.is_ok());
    }
}
