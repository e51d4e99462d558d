use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::{self, Cache};

pub mod account;
pub mod admin;
pub mod calendar;
pub mod dashboard;
pub mod health;
pub mod invitations;
pub mod players;
pub mod requests;
pub mod tenants;
pub mod trials;

/// Success envelope: `{ "success": true, "data": ... }`.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, ok(data))
}

/// Drops cached lists of `resource` for the tenant, and the dashboard
/// counters when the write changes them.
pub async fn invalidate(cache: &Cache, resource: &str, tenant_id: Uuid, counts: bool) {
    cache
        .invalidate_pattern(&cache::tenant_prefix(resource, tenant_id))
        .await;
    if counts {
        cache.del(&cache::dashboard_key(tenant_id)).await;
    }
}

/// Clamps `limit`/`offset` query values.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (limit.unwrap_or(50).clamp(1, 200), offset.unwrap_or(0).max(0))
}

/// `%term%` for ILIKE with the term's own wildcards escaped.
pub fn search_pattern(search: Option<&str>) -> Option<String> {
    search.map(str::trim).filter(|s| !s.is_empty()).map(|s| {
        let escaped = s
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    })
}
