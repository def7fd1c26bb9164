//! Identity key derivation from inbound requests.

use axum::extract::{ConnectInfo, MatchedPath};
use http::Request;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::config::RateLimitingConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::{KeyRule, PolicyTier};

/// Identity used when a request carries no signal and the policy allows
/// sharing one counter.
pub const SHARED_IDENTITY: &str = "anonymous";

/// Principal placed in request extensions by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedUser(pub String);

/// Connection id placed in request extensions by a websocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// A fresh random connection id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// What to do with a request that has no identity signal for its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdentityPolicy {
    /// Count it against a single shared key
    #[default]
    SharedKey,
    /// Refuse it with 400
    Reject,
}

/// Request-inspection options shared by every middleware instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOptions {
    pub missing_identity: MissingIdentityPolicy,
    pub trust_forwarded_for: bool,
}

impl From<&RateLimitingConfig> for IdentityOptions {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            missing_identity: config.missing_identity,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}

/// The caller's address.
///
/// Proxy headers are only consulted when `trust_forwarded_for` is set, since
/// clients can send them freely. Of `X-Forwarded-For` only the rightmost
/// entry is used: it is the one appended by the trusted proxy, while every
/// entry to its left came from the client.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let headers = request.headers();
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .last()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .and_then(|v| v.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Derive the identity key for `request` under `tier`'s key rule.
///
/// Fails with `MissingIdentity` when the signal the rule needs is absent.
pub fn derive_identity<B>(request: &Request<B>, tier: &PolicyTier, trust_forwarded_for: bool) -> Result<String> {
    let user = || {
        request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|AuthenticatedUser(id)| format!("user:{}", id))
    };
    let ip = || client_ip(request, trust_forwarded_for).map(|ip| format!("ip:{}", ip));

    let identity = match tier.key_rule() {
        KeyRule::Ip => ip(),
        KeyRule::User => user(),
        KeyRule::UserOrIp => user().or_else(ip),
        KeyRule::Connection => request
            .extensions()
            .get::<ConnectionId>()
            .map(|ConnectionId(id)| format!("conn:{}", id)),
    };

    let identity = identity.ok_or_else(|| TollgateError::MissingIdentity {
        tier: tier.name().to_string(),
        signal: tier.key_rule().signal(),
    })?;

    if tier.is_per_route() {
        // Key on the route template so `/reset/:token` is one counter.
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str)
            .unwrap_or_else(|| request.uri().path());
        Ok(format!("{}:{}", identity, route))
    } else {
        Ok(identity)
    }
}
