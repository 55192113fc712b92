//! Circuit breaker state and statistics.
//!
//! Defines the three states a circuit breaker can be in:
//! - **Closed**: normal operation, calls pass through
//! - **Open**: too many failures, calls fail fast
//! - **HalfOpen**: testing recovery with trial calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected immediately until the reset timeout elapses.
    Open,
    /// Trial calls are admitted to test whether the dependency recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Cumulative per-breaker statistics.
///
/// Updated on every call; never reset by state transitions (including
/// administrative `reset`), so the counters reflect process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Total calls seen, including short-circuited rejections.
    pub total_requests: u64,
    /// Calls that completed successfully.
    pub successes: u64,
    /// Calls the dependency itself failed.
    pub failures: u64,
    /// Calls that exceeded the call timeout.
    pub timeouts: u64,
    /// Calls rejected without attempting the dependency.
    pub rejected: u64,
    /// Wall-clock time of the most recent failure or timeout.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent success.
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Point-in-time observability record for one breaker.
///
/// Serializable for health endpoints and periodic metric export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name (one per dependency class).
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed (resets on any success).
    pub consecutive_failures: u32,
    /// Consecutive successes observed while half-open (resets on any failure).
    pub consecutive_successes: u32,
    /// Milliseconds until an open breaker admits a trial call, if open.
    pub open_remaining_ms: Option<u64>,
    /// Cumulative statistics.
    pub stats: BreakerStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half_open\""
        );
        assert_eq!(CircuitState::Open.to_string(), "open");
    }

    #[test]
    fn test_snapshot_round_trips() {
        let snapshot = BreakerSnapshot {
            name: "payments".to_string(),
            state: CircuitState::Open,
            consecutive_failures: 5,
            consecutive_successes: 0,
            open_remaining_ms: Some(12_000),
            stats: BreakerStats {
                total_requests: 42,
                failures: 5,
                ..Default::default()
            },
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: BreakerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state, CircuitState::Open);
        assert_eq!(parsed.stats.total_requests, 42);
    }
}
