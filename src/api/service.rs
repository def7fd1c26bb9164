//! Admission check service handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::header::{HeaderValue, RETRY_AFTER};
use http::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::ratelimit::{AdmissionDecision, CheckOutcome, RateLimiter};
use crate::response::ErrorResponse;

/// Shared state for the admission service.
#[derive(Clone)]
pub struct AppState {
    limiter: Arc<RateLimiter>,
}

/// Body of an admission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Identity key to count against, e.g. `conn:1f2e` or `user:42`
    pub key: String,
}

/// Admission decision returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after_secs: u64,
    /// Set when the store was unreachable and the request was let through
    #[serde(default)]
    pub degraded: bool,
}

impl From<&AdmissionDecision> for CheckResponse {
    fn from(decision: &AdmissionDecision) -> Self {
        Self {
            allowed: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_after_secs: decision.retry_after_secs(),
            degraded: false,
        }
    }
}

/// Summary of a registered tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSummary {
    pub name: String,
    pub window_secs: u64,
    pub max_requests: u64,
    pub key_rule: String,
}

/// Build the admission service router.
pub fn router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/tiers", get(list_tiers))
        .route("/v1/tiers/:tier/check", post(check))
        .fallback(not_found)
        .with_state(AppState { limiter })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tiers(State(state): State<AppState>) -> Json<Vec<TierSummary>> {
    let tiers = state
        .limiter
        .registry()
        .tiers()
        .map(|tier| TierSummary {
            name: tier.name().to_string(),
            window_secs: tier.window().length().as_secs(),
            max_requests: tier.max_requests(),
            key_rule: tier.key_rule().to_string(),
        })
        .collect();
    Json(tiers)
}

/// Count one attempt for the given key and report the decision.
#[instrument(skip_all, fields(tier = %tier))]
async fn check(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    body: std::result::Result<Json<CheckRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed admission check");
            return ErrorResponse::new(rejection.status(), rejection.body_text()).into_response();
        }
    };

    if body.key.is_empty() {
        warn!("Received admission check with empty key");
        return ErrorResponse::bad_request("key is required").into_response();
    }

    let tier = match state.limiter.resolve(&tier) {
        Ok(tier) => tier,
        Err(error) => {
            return ErrorResponse::new(StatusCode::NOT_FOUND, error.to_string()).into_response();
        }
    };

    let outcome = state.limiter.check(&tier, &body.key).await;
    debug!(key = %body.key, admitted = outcome.is_admitted(), "Admission decision made");

    match outcome {
        CheckOutcome::Allowed(decision) => Json(CheckResponse::from(&decision)).into_response(),
        CheckOutcome::Limited(decision) => {
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(CheckResponse::from(&decision))).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
            response
        }
        CheckOutcome::FailedOpen(_) => Json(CheckResponse {
            allowed: true,
            limit: tier.max_requests(),
            remaining: tier.max_requests(),
            reset_after_secs: 0,
            degraded: true,
        })
        .into_response(),
        CheckOutcome::FailedClosed(error) => ErrorResponse::service_unavailable(format!(
            "Rate limiting is temporarily unavailable: {}",
            error
        ))
        .into_response(),
    }
}

async fn not_found(method: Method, uri: Uri) -> ErrorResponse {
    ErrorResponse::not_found(&method, &uri)
}
