//! Shared counter store abstraction.
//!
//! Rate-limit counters are the only state shared across service instances.
//! This module defines the minimal atomic-counter interface the rate limiter
//! consumes, plus the two implementations: an in-process store for tests and
//! single-instance deployments, and a Redis-backed store for production.

mod memory;
mod redis;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur when talking to the counter store.
///
/// These are never surfaced to request handlers: the rate limiter resolves
/// every store error to a fail-open admission with a logged warning.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

/// Atomic counter operations backed by storage shared across instances.
///
/// Correctness of distributed rate limiting depends entirely on `incr`
/// being atomic; there is no locking or leader election on top of it.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a key, creating it at 0 first if absent.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> std::result::Result<i64, StoreError>;

    /// Atomically decrement a key. Used for best-effort compensating
    /// adjustments; the result may be transiently negative.
    async fn decr(&self, key: &str) -> std::result::Result<i64, StoreError>;

    /// Set the remaining time-to-live on an existing key. Returns false if
    /// the key does not exist.
    async fn pexpire(&self, key: &str, ttl: Duration) -> std::result::Result<bool, StoreError>;

    /// Remaining time-to-live for a key. Returns `None` when the key is
    /// missing or has no expiry.
    async fn pttl(&self, key: &str) -> std::result::Result<Option<Duration>, StoreError>;

    /// Delete keys explicitly. Returns the number of keys removed.
    async fn del(&self, keys: &[&str]) -> std::result::Result<u64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> std::result::Result<(), StoreError>;
}
