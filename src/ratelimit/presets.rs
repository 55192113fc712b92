//! Named rate-limit presets for request classes with different
//! sensitivity.
//!
//! Each preset pairs a static [`RateLimitConfig`] with an identity
//! strategy and an optional custom rejection-response generator. The
//! numeric defaults here are starting points; deployments override them
//! via [`crate::config`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::identity::{DefaultIdentity, IdentityStrategy, PremiumIdentity};
use super::limiter::{RateLimitConfig, RateLimitDecision};

/// Machine-readable rejection payload.
///
/// Status 429 for exhausted quotas, 503 for an open circuit with no
/// fallback; callers never see internal detail beyond this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionResponse {
    /// HTTP status the adapter should emit.
    pub status: u16,
    /// Short machine-readable reason code.
    pub error: String,
    /// Human-oriented message, free of internal detail.
    pub message: String,
    /// Seconds until a retry may succeed, when known.
    pub retry_after_secs: Option<u64>,
}

impl RejectionResponse {
    /// The standard "too many requests" rejection for a rate-limit
    /// decision.
    pub fn too_many_requests(decision: &RateLimitDecision) -> Self {
        Self {
            status: 429,
            error: "rate_limit_exceeded".to_string(),
            message: "Too many requests, slow down".to_string(),
            retry_after_secs: Some(decision.retry_after().as_secs().max(1)),
        }
    }

    /// The "temporarily unavailable" rejection produced when a breaker is
    /// open and no fallback exists.
    pub fn temporarily_unavailable() -> Self {
        Self {
            status: 503,
            error: "temporarily_unavailable".to_string(),
            message: "Service temporarily unavailable, try again shortly".to_string(),
            retry_after_secs: None,
        }
    }
}

type RejectionFn = dyn Fn(&RateLimitDecision) -> RejectionResponse + Send + Sync;

/// One named request class: config, key strategy, rejection shape.
#[derive(Clone)]
pub struct Preset {
    /// Preset name, also the default counter key prefix.
    pub name: String,
    /// Window/limit configuration.
    pub config: RateLimitConfig,
    /// How requests map to counter identities.
    pub strategy: Arc<dyn IdentityStrategy>,
    rejection: Option<Arc<RejectionFn>>,
}

impl Preset {
    /// A preset with the default identity strategy and rejection shape.
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            strategy: Arc::new(DefaultIdentity),
            rejection: None,
        }
    }

    /// Replace the identity strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn IdentityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Install a custom rejection-response generator.
    pub fn with_rejection<F>(mut self, rejection: F) -> Self
    where
        F: Fn(&RateLimitDecision) -> RejectionResponse + Send + Sync + 'static,
    {
        self.rejection = Some(Arc::new(rejection));
        self
    }

    /// Build the rejection response for a denied decision.
    pub fn rejection(&self, decision: &RateLimitDecision) -> RejectionResponse {
        match &self.rejection {
            Some(custom) => custom(decision),
            None => RejectionResponse::too_many_requests(decision),
        }
    }
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preset")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The catalog of named presets the request adapter selects from.
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: HashMap<String, Preset>,
}

impl PresetCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self {
            presets: HashMap::new(),
        }
    }

    /// The standard catalog: authentication, browse, reports, premium API
    /// and upload classes.
    pub fn standard() -> Self {
        let mut catalog = Self::new();

        // Brute-force mitigation: tight window, failed attempts only.
        let mut auth_config =
            RateLimitConfig::new(Duration::from_secs(15 * 60), 5, "rl:auth");
        auth_config.skip_successful = true;
        catalog.insert(
            Preset::new("auth", auth_config).with_rejection(|decision| RejectionResponse {
                status: 429,
                error: "too_many_attempts".to_string(),
                message: "Too many failed attempts, try again later".to_string(),
                retry_after_secs: Some(decision.retry_after().as_secs().max(1)),
            }),
        );

        // Generous budget for read/browse traffic.
        catalog.insert(Preset::new(
            "browse",
            RateLimitConfig::new(Duration::from_secs(60), 120, "rl:browse"),
        ));

        // Expensive aggregate/report endpoints.
        catalog.insert(Preset::new(
            "reports",
            RateLimitConfig::new(Duration::from_secs(5 * 60), 10, "rl:reports"),
        ));

        // Elevated quota in a separate key space for premium identities.
        catalog.insert(
            Preset::new(
                "premium-api",
                RateLimitConfig::new(Duration::from_secs(60), 600, "rl:api"),
            )
            .with_strategy(Arc::new(PremiumIdentity)),
        );

        // Dedicated quota for upload endpoints.
        catalog.insert(Preset::new(
            "uploads",
            RateLimitConfig::new(Duration::from_secs(60 * 60), 20, "rl:uploads"),
        ));

        catalog
    }

    /// Add or replace a preset.
    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    /// Look up a preset by name.
    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Mutable lookup, used when layering configuration overrides onto
    /// the standard catalog.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Preset> {
        self.presets.get_mut(name)
    }

    /// Names of all presets in the catalog.
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
