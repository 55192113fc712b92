//! Redis-backed counter store.
//!
//! The production implementation of [`CounterStore`]: a Redis instance (or
//! compatible server) reachable by every service instance, so increments
//! from all instances land on the same counters. Connection recovery is
//! delegated to the client's connection manager; any round-trip failure is
//! reported as [`StoreError::Unavailable`] and resolved by the rate limiter
//! as fail-open.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CounterStore, StoreError};

/// A [`CounterStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis at the given URL (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Protocol(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(unavailable)?;
        Ok(count)
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.decr(key, 1).await.map_err(unavailable)?;
        Ok(count)
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let set: bool = conn
            .pexpire(key, ttl.as_millis() as i64)
            .await
            .map_err(unavailable)?;
        Ok(set)
    }

    async fn pttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let millis: i64 = conn.pttl(key).await.map_err(unavailable)?;
        // -2 = key missing, -1 = key present without expiry.
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await.map_err(unavailable)?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply: {pong}")))
        }
    }
}
