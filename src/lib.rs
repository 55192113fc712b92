//! Breakwater - Resilience and Traffic-Control Layer
//!
//! This crate implements the admission-control and failure-containment
//! layer of a multi-tenant web service: per-dependency circuit breakers
//! and a distributed fixed-window rate limiter enforced through a shared
//! atomic counter store.
//!
//! The split of shared versus local state is deliberate: rate-limit
//! counters live in the shared store so quotas hold across every service
//! instance, while circuit breaker state is process-local, letting each
//! instance learn independently that a dependency is unhealthy without
//! introducing a consensus protocol into a failure-protection mechanism.

pub mod breaker;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;

pub use breaker::{BreakerRegistry, CircuitBreaker};
pub use error::{BreakerError, BreakwaterError};
pub use guard::RequestGuard;
pub use ratelimit::{RateLimiter, RequestMeta};
pub use store::CounterStore;
