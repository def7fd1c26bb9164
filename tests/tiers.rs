//! End-to-end behaviour of the standard tiers wrapped around an axum app.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::routing::{get, post};
use axum::Router;
use chrono::{TimeZone, Utc};
use http::{Request, StatusCode};
use tower::ServiceExt;

use tollgate::middleware::{
    AuthenticatedUser, ConnectionId, IdentityOptions, RateLimitLayer, RateLimitLayers,
};
use tollgate::ratelimit::{
    CounterSnapshot, CounterStore, FailureMode, InMemoryCounterStore, ManualClock, PolicyRegistry,
    RateLimiter, StoreError,
};
use tollgate::response::ErrorResponse;

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    hits: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    // 2024-01-01T00:00:00Z is aligned to both the 1 and 15 minute windows
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
    let limiter = Arc::new(
        RateLimiter::new(store, PolicyRegistry::builtin()).with_clock(clock.clone()),
    );
    let layers = RateLimitLayers::new(limiter, IdentityOptions::default()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counted = {
        let hits = hits.clone();
        move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "ok"
            }
        }
    };

    let app = Router::new()
        .route("/auth/login", post(counted.clone()).layer(layers.auth))
        .route("/api/feed", get(counted.clone()).layer(layers.general))
        .route("/api/friends/request", post(counted.clone()).layer(layers.strict))
        .route("/ws/message", post(counted).layer(layers.websocket));

    Harness { app, clock, hits }
}

fn request(method: &str, path: &str, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().unwrap();
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn send(app: &Router, request: Request<Body>) -> StatusCode {
    app.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_auth_tier_admits_exactly_quota() {
    let h = harness();

    for _ in 0..5 {
        let status = send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = h
        .app
        .clone()
        .oneshot(request("POST", "/auth/login", "10.0.0.1:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "900");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.code, 429);
    assert_eq!(body.message, "Too Many Requests");
    assert_eq!(
        body.details,
        "Too many authentication attempts, please try again later. Retry after 900 seconds."
    );

    // Rejected requests never reach the handler
    assert_eq!(h.hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_rejected_attempts_still_count() {
    let h = harness();

    for _ in 0..8 {
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
    }

    // Halfway through the window the caller is still limited
    h.clock.advance(Duration::from_secs(450));
    let status = send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_window_expiry_resets_counter() {
    let h = harness();

    for _ in 0..6 {
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
    }
    assert_eq!(
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await,
        StatusCode::TOO_MANY_REQUESTS
    );

    h.clock.advance(Duration::from_secs(15 * 60));
    let response = h
        .app
        .clone()
        .oneshot(request("POST", "/auth/login", "10.0.0.1:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    assert_eq!(response.headers()["x-ratelimit-reset"], "2024-01-01T00:30:00Z");
}

#[tokio::test]
async fn test_path_parameters_share_route_counter() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let store = Arc::new(InMemoryCounterStore::with_clock(clock.clone()));
    let limiter = Arc::new(RateLimiter::new(store, PolicyRegistry::builtin()).with_clock(clock));
    let layers = RateLimitLayers::new(limiter, IdentityOptions::default()).unwrap();
    let app = Router::new().route("/auth/reset/:token", post(|| async { "ok" }).layer(layers.auth));

    let mut admitted = 0;
    for token in 0..50 {
        let path = format!("/auth/reset/{}", token);
        if send(&app, request("POST", &path, "10.0.0.1:4000")).await == StatusCode::OK {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_identities_have_independent_counters() {
    let h = harness();

    for _ in 0..5 {
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
    }
    assert_eq!(
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        send(&h.app, request("POST", "/auth/login", "10.0.0.2:4000")).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_tiers_are_independent() {
    let h = harness();

    for _ in 0..6 {
        send(&h.app, request("POST", "/auth/login", "10.0.0.1:4000")).await;
    }

    // Exhausting auth leaves the general tier untouched
    let response = h
        .app
        .clone()
        .oneshot(request("GET", "/api/feed", "10.0.0.1:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
}

#[tokio::test]
async fn test_authenticated_user_keyed_across_addresses() {
    let h = harness();

    for i in 0..20 {
        let mut req = request("POST", "/api/friends/request", &format!("10.0.1.{}:4000", i));
        req.extensions_mut().insert(AuthenticatedUser("alice".to_string()));
        assert_eq!(send(&h.app, req).await, StatusCode::OK);
    }

    let mut req = request("POST", "/api/friends/request", "10.9.9.9:4000");
    req.extensions_mut().insert(AuthenticatedUser("alice".to_string()));
    assert_eq!(send(&h.app, req).await, StatusCode::TOO_MANY_REQUESTS);

    let mut req = request("POST", "/api/friends/request", "10.9.9.9:4000");
    req.extensions_mut().insert(AuthenticatedUser("bob".to_string()));
    assert_eq!(send(&h.app, req).await, StatusCode::OK);
}

#[tokio::test]
async fn test_websocket_tier_keys_by_connection() {
    let h = harness();
    let first = ConnectionId::generate();
    let second = ConnectionId::generate();

    for _ in 0..30 {
        let mut req = request("POST", "/ws/message", "10.0.0.1:4000");
        req.extensions_mut().insert(first.clone());
        assert_eq!(send(&h.app, req).await, StatusCode::OK);
    }

    let mut req = request("POST", "/ws/message", "10.0.0.1:4000");
    req.extensions_mut().insert(first.clone());
    assert_eq!(send(&h.app, req).await, StatusCode::TOO_MANY_REQUESTS);

    // Same address, different connection
    let mut req = request("POST", "/ws/message", "10.0.0.1:4000");
    req.extensions_mut().insert(second);
    assert_eq!(send(&h.app, req).await, StatusCode::OK);

    // The websocket window is one minute
    h.clock.advance(Duration::from_secs(60));
    let mut req = request("POST", "/ws/message", "10.0.0.1:4000");
    req.extensions_mut().insert(first);
    assert_eq!(send(&h.app, req).await, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_over_admit() {
    let h = harness();

    let tasks = (0..50).map(|_| {
        let app = h.app.clone();
        tokio::spawn(async move {
            app.oneshot(request("POST", "/auth/login", "10.0.0.1:4000"))
                .await
                .unwrap()
                .status()
        })
    });
    let statuses: Vec<StatusCode> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(admitted, 5);
    assert_eq!(h.hits.load(Ordering::SeqCst), 5);
}

struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn increment_and_get(&self, _key: &str, _expiry: Duration) -> Result<CounterSnapshot, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

fn app_with_failure_mode(failure_mode: FailureMode) -> Router {
    let limiter = Arc::new(
        RateLimiter::new(Arc::new(UnreachableStore), PolicyRegistry::builtin())
            .with_failure_mode(failure_mode),
    );
    let layer = RateLimitLayer::for_tier(limiter, "general").unwrap();
    Router::new().route("/api/feed", get(|| async { "ok" }).layer(layer))
}

#[tokio::test]
async fn test_store_outage_fail_open() {
    let app = app_with_failure_mode(FailureMode::Open);

    let response = app
        .oneshot(request("GET", "/api/feed", "10.0.0.1:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-ratelimit-remaining"));
}

#[tokio::test]
async fn test_store_outage_fail_closed() {
    let app = app_with_failure_mode(FailureMode::Closed);

    let response = app
        .oneshot(request("GET", "/api/feed", "10.0.0.1:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.code, 503);
    assert_ne!(body.code, 429);
}
