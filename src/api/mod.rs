//! HTTP admission check service.
//!
//! Lets callers that are not HTTP request paths, such as a websocket
//! gateway counting messages, ask the shared limiter for a decision.

mod server;
mod service;

pub use server::ApiServer;
pub use service::{router, AppState, CheckRequest, CheckResponse, TierSummary};
