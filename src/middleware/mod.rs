//! HTTP middleware applying rate limit tiers to requests.

mod identity;
mod layer;

pub use identity::{
    client_ip, derive_identity, AuthenticatedUser, ConnectionId, IdentityOptions,
    MissingIdentityPolicy, SHARED_IDENTITY,
};
pub use layer::{RateLimitLayer, RateLimitLayers, RateLimitService};
