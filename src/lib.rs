//! Tollgate - Tiered Distributed Rate Limiting
//!
//! This crate implements fixed-window rate limiting for HTTP services. Named
//! tiers share one counter store (in memory or Redis), and a tower layer
//! applies a tier to any axum router. A small HTTP service exposes the same
//! admission checks to callers outside the request path.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod response;
