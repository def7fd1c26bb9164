//! Tower middleware enforcing one rate limit tier per request.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::identity::{derive_identity, IdentityOptions, MissingIdentityPolicy, SHARED_IDENTITY};
use crate::error::Result;
use crate::ratelimit::{CheckOutcome, PolicyTier, RateLimiter, AUTH, GENERAL, STRICT, WEBSOCKET};
use crate::response::{insert_quota_headers, rate_limited, ErrorResponse};

/// A layer that enforces one tier of a [`RateLimiter`].
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    tier: Arc<PolicyTier>,
    options: IdentityOptions,
}

impl RateLimitLayer {
    /// Create a layer for a registered tier.
    ///
    /// Fails with `UnknownTier` so misconfiguration surfaces while routes
    /// are wired, not on the first request.
    pub fn for_tier(limiter: Arc<RateLimiter>, tier: &str) -> Result<Self> {
        let tier = limiter.resolve(tier)?;
        Ok(Self {
            limiter,
            tier,
            options: IdentityOptions::default(),
        })
    }

    pub fn with_options(mut self, options: IdentityOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tier(&self) -> &PolicyTier {
        &self.tier
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            tier: self.tier.clone(),
            options: self.options,
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    tier: Arc<PolicyTier>,
    options: IdentityOptions,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let tier = self.tier.clone();
        let options = self.options;

        Box::pin(async move {
            let identity = match derive_identity(&request, &tier, options.trust_forwarded_for) {
                Ok(identity) => identity,
                Err(error) => match options.missing_identity {
                    MissingIdentityPolicy::SharedKey => {
                        warn!(
                            tier = tier.name(),
                            path = %request.uri().path(),
                            error = %error,
                            "No identity signal, counting against shared key"
                        );
                        SHARED_IDENTITY.to_string()
                    }
                    MissingIdentityPolicy::Reject => {
                        warn!(
                            tier = tier.name(),
                            path = %request.uri().path(),
                            error = %error,
                            "No identity signal, rejecting request"
                        );
                        return Ok(ErrorResponse::bad_request(error.to_string()).into_response());
                    }
                },
            };

            match limiter.check(&tier, &identity).await {
                CheckOutcome::Allowed(decision) => {
                    let mut response = inner.call(request).await?;
                    insert_quota_headers(response.headers_mut(), &decision, limiter.now());
                    Ok(response)
                }
                CheckOutcome::FailedOpen(_) => inner.call(request).await,
                CheckOutcome::Limited(decision) => {
                    warn!(
                        tier = tier.name(),
                        identity = %identity,
                        path = %request.uri().path(),
                        "Rate limit exceeded"
                    );
                    Ok(rate_limited(&decision, tier.message(), limiter.now()))
                }
                CheckOutcome::FailedClosed(error) => {
                    Ok(ErrorResponse::service_unavailable(format!(
                        "Rate limiting is temporarily unavailable: {}",
                        error
                    ))
                    .into_response())
                }
            }
        })
    }
}

/// The four standard middleware instances.
#[derive(Clone)]
pub struct RateLimitLayers {
    pub general: RateLimitLayer,
    pub auth: RateLimitLayer,
    pub strict: RateLimitLayer,
    pub websocket: RateLimitLayer,
}

impl RateLimitLayers {
    /// Resolve the standard tiers; fails if any is not registered.
    pub fn new(limiter: Arc<RateLimiter>, options: IdentityOptions) -> Result<Self> {
        let layer = |tier: &str| -> Result<RateLimitLayer> {
            Ok(RateLimitLayer::for_tier(limiter.clone(), tier)?.with_options(options))
        };

        Ok(Self {
            general: layer(GENERAL)?,
            auth: layer(AUTH)?,
            strict: layer(STRICT)?,
            websocket: layer(WEBSOCKET)?,
        })
    }
}
