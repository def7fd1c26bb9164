//! Core rate limiter implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::evaluator::{evaluate, AdmissionDecision};
use super::key::CounterKey;
use super::registry::PolicyRegistry;
use super::store::{CounterStore, StoreError};
use super::tier::PolicyTier;
use super::window::{Clock, SystemClock};
use crate::error::Result;

/// Default bound on a single counter store call.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request and log a warning
    #[default]
    Open,
    /// Reject the request as unavailable
    Closed,
}

/// Result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Within quota
    Allowed(AdmissionDecision),
    /// Over quota
    Limited(AdmissionDecision),
    /// Store failed and the limiter fails open
    FailedOpen(StoreError),
    /// Store failed and the limiter fails closed
    FailedClosed(StoreError),
}

impl CheckOutcome {
    /// Whether the request should reach downstream handlers.
    pub fn is_admitted(&self) -> bool {
        matches!(self, CheckOutcome::Allowed(_) | CheckOutcome::FailedOpen(_))
    }

    /// The quota decision, when the store answered.
    pub fn decision(&self) -> Option<&AdmissionDecision> {
        match self {
            CheckOutcome::Allowed(d) | CheckOutcome::Limited(d) => Some(d),
            CheckOutcome::FailedOpen(_) | CheckOutcome::FailedClosed(_) => None,
        }
    }
}

/// The rate limiter shared by every middleware instance.
///
/// Holds the tier registry and the counter store; each check increments
/// the caller's counter for the current window exactly once.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    registry: PolicyRegistry,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a rate limiter with the system clock, failing open.
    pub fn new(store: Arc<dyn CounterStore>, registry: PolicyRegistry) -> Self {
        Self {
            store,
            registry,
            clock: Arc::new(SystemClock),
            failure_mode: FailureMode::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Current time as seen by the limiter.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Look up a registered tier.
    pub fn resolve(&self, tier: &str) -> Result<Arc<PolicyTier>> {
        self.registry.resolve(tier)
    }

    /// Check a named tier for `identity`.
    pub async fn check_tier(&self, tier: &str, identity: &str) -> Result<CheckOutcome> {
        let tier = self.resolve(tier)?;
        Ok(self.check(&tier, identity).await)
    }

    /// Record one attempt by `identity` against `tier` and decide admission.
    ///
    /// Rejected attempts count too, so retrying while limited does not
    /// shorten the wait. Store failures never escape; they are turned into
    /// the configured failure mode.
    pub async fn check(&self, tier: &PolicyTier, identity: &str) -> CheckOutcome {
        let now = self.clock.now();
        let window = tier.window();
        let key = CounterKey::new(tier.name(), identity, window.bucket_start(now));

        trace!(key = %key, "Checking rate limit");

        let result = tokio::time::timeout(
            self.store_timeout,
            self.store.increment_and_get(&key.to_store_key(), window.reset_after(now)),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout(self.store_timeout)));

        match result {
            Ok(snapshot) => {
                let decision = evaluate(snapshot.count, tier.max_requests(), snapshot.ttl);
                if decision.allowed {
                    CheckOutcome::Allowed(decision)
                } else {
                    debug!(
                        key = %key,
                        count = snapshot.count,
                        limit = tier.max_requests(),
                        "Rate limit exceeded"
                    );
                    CheckOutcome::Limited(decision)
                }
            }
            Err(error) => match self.failure_mode {
                FailureMode::Open => {
                    warn!(
                        tier = tier.name(),
                        backend = self.store.backend(),
                        error = %error,
                        "Counter store unavailable, failing open"
                    );
                    CheckOutcome::FailedOpen(error)
                }
                FailureMode::Closed => {
                    warn!(
                        tier = tier.name(),
                        backend = self.store.backend(),
                        error = %error,
                        "Counter store unavailable, failing closed"
                    );
                    CheckOutcome::FailedClosed(error)
                }
            },
        }
    }
}
