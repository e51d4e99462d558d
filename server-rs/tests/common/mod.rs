//! Shared helpers for the router tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use tower::ServiceExt;
use uuid::Uuid;

use scoutdesk_api::{config::Config, middleware::auth::Claims};

pub const JWT_SECRET: &str = "router-test-secret";

/// Config with a fixed signing secret and no outbound integrations.
pub fn test_config() -> Config {
    let mut config = Config::from_env();
    config.app_env = "test".into();
    config.auth.jwt_secret = JWT_SECRET.into();
    config.auth.service_role_key = String::new();
    config.ai.api_key = None;
    config.rate_limit.max_requests = 10_000;
    config
}

pub fn bearer_for(config: &Config, user_id: Uuid) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: Some(format!("{user_id}@club.test")),
        aud: config.auth.jwt_audience.clone(),
        role: Some("authenticated".into()),
        exp: now + 3600,
        iat: Some(now),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.auth.jwt_secret.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Authenticated request; `body` is sent as JSON when present.
pub fn authed(method: Method, uri: &str, auth: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, auth);
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// A freshly migrated database of its own, created inside the server named
/// by `TEST_DATABASE_URL`.
///
/// Tests built on it return early when that variable is unset, so the rest
/// of the suite runs without Postgres.
pub struct TestDb {
    pub pool: PgPool,
    name: String,
    server_url: String,
}

impl TestDb {
    pub async fn new() -> Option<Self> {
        let Ok(server_url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping database test");
            return None;
        };
        let name = format!("scoutdesk_test_{}", Uuid::new_v4().simple());

        let mut admin = PgConnection::connect(&server_url).await.unwrap();
        sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&mut admin)
            .await
            .unwrap();
        admin.close().await.unwrap();

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&with_database(&server_url, &name))
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        Some(Self {
            pool,
            name,
            server_url,
        })
    }

    /// Closes the pool and drops the database.
    pub async fn cleanup(self) {
        self.pool.close().await;
        if let Ok(mut admin) = PgConnection::connect(&self.server_url).await {
            let drop = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
            if let Err(e) = sqlx::query(&drop).execute(&mut admin).await {
                eprintln!("failed to drop test database {}: {e}", self.name);
            }
            let _ = admin.close().await;
        }
    }

    pub async fn user(&self, super_admin: bool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, email, is_super_admin) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(format!("{id}@club.test"))
            .bind(super_admin)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    pub async fn tenant(&self, slug: &str) -> Uuid {
        sqlx::query_scalar("INSERT INTO tenants (name, slug) VALUES ($1, $1) RETURNING id")
            .bind(slug)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn member(&self, tenant_id: Uuid, user_id: Uuid, role: &str) {
        sqlx::query(
            "INSERT INTO tenant_memberships (tenant_id, user_id, role) VALUES ($1, $2, $3::tenant_role)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn owner_count(&self, tenant_id: Uuid) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM tenant_memberships WHERE tenant_id = $1 AND role = 'OWNER'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }
}

/// Swaps the database name in a `postgres://` URL, keeping any query string.
fn with_database(url: &str, name: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let authority_start = base.find("://").map(|i| i + 3).unwrap_or(0);
    let root = match base[authority_start..].find('/') {
        Some(slash) => &base[..authority_start + slash],
        None => base,
    };
    match query {
        Some(query) => format!("{root}/{name}?{query}"),
        None => format!("{root}/{name}"),
    }
}
