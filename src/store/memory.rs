//! In-process counter store.
//!
//! Backed by a `DashMap` with lazy expiry: an entry whose deadline has
//! passed is treated as absent by every operation that touches it. State
//! lives in-process only, so this store is suitable for tests and
//! single-instance deployments, not for enforcing limits across a fleet.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CounterStore, StoreError};

#[derive(Debug)]
struct Entry {
    count: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// An in-memory [`CounterStore`] with per-key expiry.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys. Primarily useful for tests.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Whether the store currently holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });

        // An expired key restarts from zero with no TTL; the caller is
        // responsible for arming the next window via pexpire.
        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count -= 1;
        Ok(entry.count)
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(entry
                .expires_at
                .map(|deadline| deadline.saturating_duration_since(now))),
            _ => Ok(None),
        }
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(*key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_incr_creates_and_counts() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.incr("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pexpire_requires_existing_key() {
        let store = MemoryCounterStore::new();

        assert!(!store.pexpire("missing", Duration::from_secs(1)).await.unwrap());

        store.incr("k").await.unwrap();
        assert!(store.pexpire("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_does_not_reset_ttl() {
        let store = MemoryCounterStore::new();

        store.incr("k").await.unwrap();
        store.pexpire("k", Duration::from_millis(100)).await.unwrap();
        let ttl_before = store.pttl("k").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.incr("k").await.unwrap();
        let ttl_after = store.pttl("k").await.unwrap().unwrap();

        assert!(ttl_after < ttl_before, "increment must not rearm the TTL");
    }

    #[tokio::test]
    async fn test_expired_key_restarts_from_zero() {
        let store = MemoryCounterStore::new();

        store.incr("k").await.unwrap();
        store.incr("k").await.unwrap();
        store.pexpire("k", Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        // Expired: pttl reports missing, and the next increment starts over.
        assert_eq!(store.pttl("k").await.unwrap(), None);
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_decr_compensates() {
        let store = MemoryCounterStore::new();

        store.incr("k").await.unwrap();
        store.incr("k").await.unwrap();
        assert_eq!(store.decr("k").await.unwrap(), 1);
        // Best effort: decrementing past zero is allowed.
        assert_eq!(store.decr("k").await.unwrap(), 0);
        assert_eq!(store.decr("k").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_del_removes_keys() {
        let store = MemoryCounterStore::new();

        store.incr("a").await.unwrap();
        store.incr("b").await.unwrap();

        assert_eq!(store.del(&["a", "b", "missing"]).await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ping_is_ok() {
        let store = MemoryCounterStore::new();
        tokio_test::assert_ok!(store.ping().await);
    }
}
