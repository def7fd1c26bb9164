//! Policy registry: the table of named tiers.
//!
//! The registry is filled once at startup and then shared read-only, so
//! lookups during request handling need no locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::tier::{KeyRule, PolicyTier};
use crate::config::RateLimitingConfig;
use crate::error::{Result, TollgateError};

/// Name of the default tier for ordinary API traffic.
pub const GENERAL: &str = "general";
/// Name of the tier guarding authentication endpoints.
pub const AUTH: &str = "auth";
/// Name of the tier for expensive or abuse-prone endpoints.
pub const STRICT: &str = "strict";
/// Name of the tier counting websocket messages.
pub const WEBSOCKET: &str = "websocket";

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Table of registered rate limit tiers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    tiers: BTreeMap<String, Arc<PolicyTier>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four standard tiers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for tier in builtin_tiers() {
            // Names are distinct constants.
            let _ = registry.register(tier);
        }
        registry
    }

    /// Build the registry from configuration.
    ///
    /// An empty tier table yields the built-in tiers.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        if config.tiers.is_empty() {
            info!("No rate limit tiers configured, using built-in tiers");
            return Ok(Self::builtin());
        }

        let mut registry = Self::new();
        for tier_config in &config.tiers {
            registry.register(PolicyTier::from(tier_config))?;
        }

        info!(tiers = ?registry.names(), "Rate limit tiers registered");
        Ok(registry)
    }

    /// Register a tier. Names must be unique.
    pub fn register(&mut self, tier: PolicyTier) -> Result<()> {
        if tier.name().is_empty() {
            return Err(TollgateError::Config("tier name must not be empty".to_string()));
        }
        // The tier is the only counter key segment that may not hold a separator.
        if tier.name().contains(':') {
            return Err(TollgateError::Config(format!(
                "tier name {} must not contain ':'",
                tier.name()
            )));
        }
        if tier.window().length().is_zero() {
            return Err(TollgateError::Config(format!(
                "tier {} has a zero-length window",
                tier.name()
            )));
        }
        if self.tiers.contains_key(tier.name()) {
            return Err(TollgateError::DuplicateTier(tier.name().to_string()));
        }

        debug!(
            tier = tier.name(),
            window_secs = tier.window().length().as_secs(),
            max_requests = tier.max_requests(),
            key_rule = %tier.key_rule(),
            "Registering rate limit tier"
        );
        self.tiers.insert(tier.name().to_string(), Arc::new(tier));
        Ok(())
    }

    /// Look up a tier by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<PolicyTier>> {
        self.tiers
            .get(name)
            .cloned()
            .ok_or_else(|| TollgateError::UnknownTier(name.to_string()))
    }

    /// Registered tier names, in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tiers.keys().map(String::as_str).collect()
    }

    /// Registered tiers, in name order.
    pub fn tiers(&self) -> impl Iterator<Item = &Arc<PolicyTier>> {
        self.tiers.values()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

fn builtin_tiers() -> [PolicyTier; 4] {
    [
        PolicyTier::new(GENERAL, FIFTEEN_MINUTES, 100, KeyRule::UserOrIp)
            .per_route(true)
            .with_message("Too many requests, please try again later."),
        PolicyTier::new(AUTH, FIFTEEN_MINUTES, 5, KeyRule::Ip)
            .per_route(true)
            .with_message("Too many authentication attempts, please try again later."),
        PolicyTier::new(STRICT, FIFTEEN_MINUTES, 20, KeyRule::UserOrIp)
            .per_route(true)
            .with_message("Rate limit exceeded, please slow down."),
        PolicyTier::new(WEBSOCKET, Duration::from_secs(60), 30, KeyRule::Connection)
            .with_message("Too many WebSocket messages, please slow down."),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;

    #[test]
    fn test_builtin_tiers() {
        let registry = PolicyRegistry::builtin();
        assert_eq!(registry.names(), vec![AUTH, GENERAL, STRICT, WEBSOCKET]);

        let auth = registry.resolve(AUTH).unwrap();
        assert_eq!(auth.max_requests(), 5);
        assert_eq!(auth.window().length(), FIFTEEN_MINUTES);
        assert_eq!(auth.key_rule(), KeyRule::Ip);

        let websocket = registry.resolve(WEBSOCKET).unwrap();
        assert_eq!(websocket.max_requests(), 30);
        assert_eq!(websocket.key_rule(), KeyRule::Connection);
        assert!(!websocket.is_per_route());
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = PolicyRegistry::new();
        registry
            .register(PolicyTier::new("api", Duration::from_secs(1), 10, KeyRule::Ip))
            .unwrap();

        let err = registry
            .register(PolicyTier::new("api", Duration::from_secs(60), 1, KeyRule::User))
            .unwrap_err();
        assert!(matches!(err, TollgateError::DuplicateTier(name) if name == "api"));

        // The original registration is untouched
        assert_eq!(registry.resolve("api").unwrap().max_requests(), 10);
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = PolicyRegistry::builtin();
        let err = registry.resolve("premium").unwrap_err();
        assert!(matches!(err, TollgateError::UnknownTier(name) if name == "premium"));
    }

    #[test]
    fn test_register_rejects_zero_window() {
        let mut registry = PolicyRegistry::new();
        let err = registry
            .register(PolicyTier::new("broken", Duration::ZERO, 10, KeyRule::Ip))
            .unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_register_rejects_separator_in_name() {
        let mut registry = PolicyRegistry::new();
        let err = registry
            .register(PolicyTier::new("a:b", Duration::from_secs(60), 10, KeyRule::Ip))
            .unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config_empty_uses_builtin() {
        let registry = PolicyRegistry::from_config(&RateLimitingConfig::default()).unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_from_config_custom_tiers() {
        let config = RateLimitingConfig {
            tiers: vec![TierConfig {
                name: "uploads".to_string(),
                window_secs: 3600,
                max_requests: 10,
                key_rule: KeyRule::User,
                per_route: false,
                message: None,
            }],
            ..Default::default()
        };

        let registry = PolicyRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["uploads"]);
        assert!(registry.resolve(GENERAL).is_err());
    }

    #[test]
    fn test_from_config_duplicate_fails() {
        let tier = TierConfig {
            name: "uploads".to_string(),
            window_secs: 3600,
            max_requests: 10,
            key_rule: KeyRule::User,
            per_route: false,
            message: None,
        };
        let config = RateLimitingConfig {
            tiers: vec![tier.clone(), tier],
            ..Default::default()
        };

        assert!(matches!(
            PolicyRegistry::from_config(&config),
            Err(TollgateError::DuplicateTier(_))
        ));
    }
}
