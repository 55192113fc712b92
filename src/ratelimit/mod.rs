//! Distributed rate limiting: admission control keyed by caller identity.

mod identity;
mod limiter;
mod presets;

pub use identity::{DefaultIdentity, IdentityStrategy, PremiumIdentity, RequestMeta};
pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use presets::{Preset, PresetCatalog, RejectionResponse};
