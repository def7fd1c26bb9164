//! Error types for the Tollgate service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tier with the same name is already registered
    #[error("Duplicate rate limit tier: {0}")]
    DuplicateTier(String),

    /// The requested tier is not registered
    #[error("Unknown rate limit tier: {0}")]
    UnknownTier(String),

    /// No identity signal could be derived from the request
    #[error("Missing identity for tier {tier}: request carries no {signal}")]
    MissingIdentity { tier: String, signal: &'static str },

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
