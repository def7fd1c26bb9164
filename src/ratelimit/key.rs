//! Counter key generation.

/// A key that uniquely identifies one window's counter.
///
/// The key is composed of the tier, the caller's identity and the window
/// bucket, so a new bucket always starts from a fresh counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The tier this counter belongs to
    pub tier: String,
    /// The caller's identity key
    pub identity: String,
    /// Window bucket start in epoch milliseconds
    pub bucket: i64,
}

impl CounterKey {
    pub fn new(tier: &str, identity: &str, bucket: i64) -> Self {
        Self {
            tier: tier.to_string(),
            identity: identity.to_string(),
            bucket,
        }
    }

    /// Convert the key to the string stored in the counter store.
    ///
    /// Format: `rate_limit:{tier}:{identity}:{bucket}`
    pub fn to_store_key(&self) -> String {
        format!("rate_limit:{}:{}:{}", self.tier, self.identity, self.bucket)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
