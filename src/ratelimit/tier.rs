//! Rate limit tiers: named policies with a window, a quota and a key rule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::window::Window;
use crate::config::TierConfig;

/// Rejection text used when a tier does not configure its own.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// How the identity key is derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRule {
    /// Client address
    Ip,
    /// Authenticated principal id
    User,
    /// Authenticated principal id, client address for anonymous callers
    UserOrIp,
    /// Connection (socket) id
    Connection,
}

impl KeyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRule::Ip => "ip",
            KeyRule::User => "user",
            KeyRule::UserOrIp => "user_or_ip",
            KeyRule::Connection => "connection",
        }
    }

    /// The request signal this rule reads, for error reporting.
    pub fn signal(&self) -> &'static str {
        match self {
            KeyRule::Ip => "client address",
            KeyRule::User => "authenticated user",
            KeyRule::UserOrIp => "authenticated user or client address",
            KeyRule::Connection => "connection id",
        }
    }
}

impl std::fmt::Display for KeyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named rate limiting policy.
///
/// Tiers are immutable once built; the registry hands them out behind `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTier {
    name: String,
    window: Window,
    max_requests: u64,
    key_rule: KeyRule,
    per_route: bool,
    message: String,
}

impl PolicyTier {
    pub fn new(name: impl Into<String>, window: Duration, max_requests: u64, key_rule: KeyRule) -> Self {
        Self {
            name: name.into(),
            window: Window::new(window),
            max_requests,
            key_rule,
            per_route: false,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    /// Count each request path separately.
    pub fn per_route(mut self, per_route: bool) -> Self {
        self.per_route = per_route;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn key_rule(&self) -> KeyRule {
        self.key_rule
    }

    pub fn is_per_route(&self) -> bool {
        self.per_route
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&TierConfig> for PolicyTier {
    fn from(config: &TierConfig) -> Self {
        let tier = PolicyTier::new(
            config.name.clone(),
            Duration::from_secs(config.window_secs),
            config.max_requests,
            config.key_rule,
        )
        .per_route(config.per_route);

        match &config.message {
            Some(message) => tier.with_message(message.clone()),
            None => tier,
        }
    }
}
