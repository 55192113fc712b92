//! Circuit breaking for external dependency calls.
//!
//! Each external dependency class (datastore, cache, mail relay, payment
//! gateway, object storage) gets one [`CircuitBreaker`] owned by a
//! [`BreakerRegistry`]. Breaker state is process-local; see the crate docs
//! for why it is deliberately not shared across instances.

mod breaker;
mod registry;
mod state;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use registry::{BreakerRegistry, STANDARD_DEPENDENCIES};
pub use state::{BreakerSnapshot, BreakerStats, CircuitState};
