//! Caller identity extraction for rate limiting.
//!
//! Limits key off request metadata only; domain objects never reach this
//! layer. Strategies are pluggable so different presets can partition the
//! key space differently.

use std::net::IpAddr;

/// The request metadata the traffic-control layer consumes.
///
/// Deliberately opaque about everything else: no headers, no body, no
/// domain entities.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Authenticated principal id, if any.
    pub principal: Option<String>,
    /// Network address the request arrived from.
    pub peer_addr: IpAddr,
    /// Whether the caller is on a premium tier.
    pub premium: bool,
}

impl RequestMeta {
    /// Metadata for an unauthenticated request.
    pub fn anonymous(peer_addr: IpAddr) -> Self {
        Self {
            principal: None,
            peer_addr,
            premium: false,
        }
    }

    /// Metadata for an authenticated request.
    pub fn authenticated(principal: impl Into<String>, peer_addr: IpAddr) -> Self {
        Self {
            principal: Some(principal.into()),
            peer_addr,
            premium: false,
        }
    }
}

/// Maps a request to the identity string its counters are keyed by.
pub trait IdentityStrategy: Send + Sync {
    /// Derive the rate-limit identity for a request.
    fn identity(&self, request: &RequestMeta) -> String;
}

/// Default strategy: the authenticated principal id, else the network
/// address.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIdentity;

impl IdentityStrategy for DefaultIdentity {
    fn identity(&self, request: &RequestMeta) -> String {
        match &request.principal {
            Some(principal) => principal.clone(),
            None => request.peer_addr.to_string(),
        }
    }
}

/// Premium-tier strategy: high-tier principals are routed to a separate
/// key space (so they can carry a larger quota); everyone else falls back
/// to the default identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PremiumIdentity;

impl IdentityStrategy for PremiumIdentity {
    fn identity(&self, request: &RequestMeta) -> String {
        match (&request.principal, request.premium) {
            (Some(principal), true) => format!("premium:{principal}"),
            _ => DefaultIdentity.identity(request),
        }
    }
}
