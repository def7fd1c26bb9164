//! Structured error responses and rate limit headers.

use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use http::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::ratelimit::AdmissionDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error body shared by every non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    pub details: String,
}

impl ErrorResponse {
    /// Build an error body whose message is the status' reason phrase.
    pub fn new(status: StatusCode, details: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Error").to_string(),
            details: details.into(),
        }
    }

    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, details)
    }

    pub fn too_many_requests(details: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, details)
    }

    pub fn service_unavailable(details: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, details)
    }

    /// 404 body for a route nothing handles.
    pub fn not_found(method: &Method, uri: &Uri) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Route {} {} not found", method, uri.path()),
        )
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Build the 429 response for a rejected request.
pub fn rate_limited(decision: &AdmissionDecision, message: &str, now: DateTime<Utc>) -> Response {
    let retry_after = decision.retry_after_secs();
    let body = ErrorResponse::too_many_requests(format!(
        "{} Retry after {} seconds.",
        message, retry_after
    ));

    let mut response = body.into_response();
    let headers = response.headers_mut();
    insert_quota_headers(headers, decision, now);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Add `X-RateLimit-*` headers describing the caller's quota.
pub fn insert_quota_headers(headers: &mut HeaderMap, decision: &AdmissionDecision, now: DateTime<Utc>) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset_after = chrono::Duration::milliseconds(decision.reset_after.as_millis() as i64);
    let reset_at = (now + reset_after).to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset_at) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}
