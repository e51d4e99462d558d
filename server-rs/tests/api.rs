mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use common::{bearer_for, get, post_json, send, test_config};
use scoutdesk_api::{build_router, cache::Cache, middleware::rate_limit::RateLimiter, AppState};

/// State over a pool that never connects; routes under test must answer
/// before touching the database.
fn test_state() -> AppState {
    let mut config = test_config();
    config.rate_limit.max_requests = 300;
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://postgres@127.0.0.1:1/scoutdesk_test")
        .unwrap();
    AppState::new(pool, Cache::in_memory(30), config).unwrap()
}

#[tokio::test]
async fn health_reports_cache_backend() {
    let app = build_router(test_state());
    let (status, body) = send(app, get("/health")).await;
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["cache"]["backend"], "memory");
    assert_eq!(body["cache"]["ok"], true);
}

#[tokio::test]
async fn tenant_routes_require_a_token() {
    let app = build_router(test_state());
    let (status, body) = send(app, get("/api/players?tenant=fc-test")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No token provided");
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let app = build_router(test_state());
    let req = Request::builder()
        .uri("/api/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn missing_tenant_parameter_is_bad_request() {
    let state = test_state();
    let auth = bearer_for(&state.config, Uuid::new_v4());
    let app = build_router(state);
    let req = Request::builder()
        .uri("/api/trials")
        .header(header::AUTHORIZATION, auth)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing tenant parameter");
}

#[tokio::test]
async fn calendar_feed_rejects_bad_token() {
    let app = build_router(test_state());
    let uri = format!("/api/calendar/feed/{}?token=deadbeef", Uuid::new_v4());
    let (status, body) = send(app, get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid feed token");
}

#[tokio::test]
async fn signup_validates_before_calling_out() {
    let app = build_router(test_state());
    let req = post_json(
        "/api/auth/signup",
        json!({
            "email": "not-an-email",
            "password": "longenough",
            "organizationName": "FC Example",
        }),
    );
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "A valid email is required");
}

#[tokio::test]
async fn accept_requires_a_token() {
    let app = build_router(test_state());
    let (status, body) = send(app, post_json("/api/invitations/accept", json!({ "token": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Token is required");
}

#[tokio::test]
async fn admin_routes_require_a_token() {
    let app = build_router(test_state());
    let (status, _) = send(app, get("/api/admin/tenants")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rate_limit_applies_before_routing() {
    let mut state = test_state();
    state.rate_limiter = RateLimiter::new(1, 60);
    let app = build_router(state);

    let (first, _) = send(app.clone(), get("/api/me")).await;
    assert_eq!(first, StatusCode::UNAUTHORIZED);
    let (second, body) = send(app, get("/api/me")).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests");
}
