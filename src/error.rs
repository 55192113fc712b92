//! Error types for the Breakwater layer.

use std::time::Duration;

use thiserror::Error;

/// Opaque error type for wrapped dependency operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for Breakwater operations.
#[derive(Error, Debug)]
pub enum BreakwaterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Breakwater operations.
pub type Result<T> = std::result::Result<T, BreakwaterError>;

/// Error returned by a circuit breaker when a wrapped call does not
/// produce a value.
///
/// `CircuitOpen` means the dependency was never attempted; `Timeout` and
/// `Dependency` mean it was attempted and counted as a failure.
#[derive(Error, Debug)]
pub enum BreakerError {
    /// The breaker short-circuited the call without attempting the dependency.
    #[error("circuit '{breaker}' is open, retry in {retry_in:?}")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        breaker: String,
        /// Time remaining until the breaker will admit a trial call.
        retry_in: Duration,
    },

    /// The dependency did not resolve within the breaker's call timeout.
    #[error("call through '{breaker}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the breaker that timed the call out.
        breaker: String,
        /// The configured call timeout.
        timeout: Duration,
    },

    /// The dependency itself failed.
    #[error("call through '{breaker}' failed: {source}")]
    Dependency {
        /// Name of the breaker that recorded the failure.
        breaker: String,
        /// The underlying dependency error.
        #[source]
        source: BoxError,
    },
}

impl BreakerError {
    /// Whether this error is a short-circuit rejection (the dependency was
    /// never attempted).
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    /// The name of the breaker that produced this error.
    pub fn breaker(&self) -> &str {
        match self {
            BreakerError::CircuitOpen { breaker, .. }
            | BreakerError::Timeout { breaker, .. }
            | BreakerError::Dependency { breaker, .. } => breaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let open = BreakerError::CircuitOpen {
            breaker: "datastore".to_string(),
            retry_in: Duration::from_secs(30),
        };
        let failed = BreakerError::Dependency {
            breaker: "datastore".to_string(),
            source: "connection refused".into(),
        };

        assert!(open.is_open());
        assert!(!failed.is_open());
        assert_eq!(open.breaker(), "datastore");
    }

    #[test]
    fn test_dependency_error_preserves_source() {
        let err = BreakerError::Dependency {
            breaker: "cache".to_string(),
            source: "io error".into(),
        };

        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert_eq!(source.unwrap().to_string(), "io error");
    }
}
