//! Registry of named circuit breakers.
//!
//! The service owns one breaker per dependency class. The registry is an
//! explicitly constructed, long-lived object passed to whatever layer
//! issues outbound calls; tests build isolated registries of their own
//! rather than sharing ambient globals.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::breaker::{BreakerConfig, CircuitBreaker};
use super::state::BreakerSnapshot;

/// The standard dependency classes a multi-tenant web service guards.
pub const STANDARD_DEPENDENCIES: [&str; 5] =
    ["datastore", "cache", "mail", "payments", "object-storage"];

/// A fixed set of named circuit breakers, one per dependency class.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Build a registry from per-dependency configurations.
    pub fn new(configs: HashMap<String, BreakerConfig>) -> Self {
        let breakers = configs
            .into_iter()
            .map(|(name, config)| {
                let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
                (name, breaker)
            })
            .collect();
        Self { breakers }
    }

    /// Build a registry covering the standard dependency classes with
    /// default settings.
    pub fn with_defaults() -> Self {
        let configs = STANDARD_DEPENDENCIES
            .iter()
            .map(|name| (name.to_string(), BreakerConfig::default()))
            .collect();
        Self::new(configs)
    }

    /// Look up a breaker by dependency name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    /// Names of all registered breakers.
    pub fn names(&self) -> Vec<&str> {
        self.breakers.keys().map(String::as_str).collect()
    }

    /// Snapshot every breaker's state and statistics, for health and
    /// metrics endpoints. Sorted by name for stable output.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Force every breaker closed with zeroed streak counters.
    pub fn reset_all(&self) {
        info!(count = self.breakers.len(), "Resetting all circuit breakers");
        for breaker in self.breakers.values() {
            breaker.reset();
        }
    }

    /// Force one breaker closed. Returns false if the name is unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Force one breaker open. Returns false if the name is unknown.
    pub fn force_open(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.force_open();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}
