use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{created, invalidate, ok, page, search_pattern};
use crate::cache;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::TenantContext;
use crate::models::request::*;
use crate::services::whatsapp;
use crate::AppState;

const RESOURCE: &str = "requests";
const MAX_BULK: usize = 100;

pub async fn list_requests(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Query(q): Query<RequestQuery>,
) -> AppResult<Json<Value>> {
    let key = cache::key(RESOURCE, tenant.id, &q);
    if let Some(cached) = state.cache.get_json::<Value>(&key).await {
        return Ok(ok(cached));
    }

    let (limit, offset) = page(q.limit, q.offset);
    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM requests WHERE tenant_id = ");
    query.push_bind(tenant.id);
    if let Some(status) = q.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(priority) = q.priority {
        query.push(" AND priority = ");
        query.push_bind(priority);
    }
    if let Some(position) = q.position.as_deref().filter(|p| !p.is_empty()) {
        query.push(" AND position ILIKE ");
        query.push_bind(position.trim().to_string());
    }
    if let Some(deal) = q.deal_type {
        query.push(" AND ");
        query.push_bind(deal.to_string());
        query.push(" = ANY(string_to_array(deal_type, ','))");
    }
    if let Some(pattern) = search_pattern(q.search.as_deref()) {
        query.push(" AND (club ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR league ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR country ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR notes ILIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
    query.push(
        " ORDER BY CASE priority WHEN 'URGENT' THEN 0 WHEN 'HIGH' THEN 1 WHEN 'MEDIUM' THEN 2 ELSE 3 END, created_at DESC LIMIT ",
    );
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let rows = query
        .build_query_as::<TransferRequest>()
        .fetch_all(&state.db)
        .await?;
    let views: Vec<RequestView> = rows.into_iter().map(RequestView::from).collect();

    let data = serde_json::to_value(&views).map_err(|e| AppError::Internal(e.to_string()))?;
    state.cache.set_json(&key, &data, state.cache.default_ttl()).await;
    Ok(ok(data))
}

pub async fn get_request(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let request = fetch_request(&state, tenant.id, id).await?;
    Ok(ok(RequestView::from(request)))
}

pub async fn create_request(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<CreateRequestBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_write()?;
    body.validate().map_err(AppError::BadRequest)?;

    let mut conn = state.db.acquire().await?;
    let request = insert_request(&mut *conn, tenant.id, user.id, &body).await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    Ok(created(RequestView::from(request)))
}

/// Creates every request or none; used to save reviewed parser output.
pub async fn bulk_create(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<BulkCreateBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_write()?;
    if body.requests.is_empty() {
        return Err(AppError::BadRequest("No requests to create".into()));
    }
    if body.requests.len() > MAX_BULK {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_BULK} requests per batch"
        )));
    }
    for (i, request) in body.requests.iter().enumerate() {
        request
            .validate()
            .map_err(|msg| AppError::BadRequest(format!("Request {}: {msg}", i + 1)))?;
    }

    let mut tx = state.db.begin().await?;
    let mut views = Vec::with_capacity(body.requests.len());
    for request in &body.requests {
        let row = insert_request(&mut *tx, tenant.id, user.id, request).await?;
        views.push(RequestView::from(row));
    }
    tx.commit().await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    tracing::info!(tenant = %tenant.id, count = views.len(), "requests bulk created");
    Ok(created(views))
}

pub async fn update_request(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRequestBody>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;
    let current = fetch_request(&state, tenant.id, id).await?;
    body.validate_against(&current).map_err(AppError::BadRequest)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE requests SET updated_at = NOW()");
    if let Some(v) = &body.club {
        query.push(", club = ");
        query.push_bind(v.trim().to_string());
    }
    if let Some(v) = &body.country {
        query.push(", country = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = &body.league {
        query.push(", league = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = &body.position {
        query.push(", position = ");
        query.push_bind(v.trim().to_string());
    }
    if let Some(v) = &body.deal_types {
        query.push(", deal_type = ");
        query.push_bind(join_deal_types(v));
    }
    if let Some(v) = body.status {
        query.push(", status = ");
        query.push_bind(v);
    }
    if let Some(v) = body.priority {
        query.push(", priority = ");
        query.push_bind(v);
    }
    if let Some(v) = body.transfer_window_open {
        query.push(", window_open = ");
        query.push_bind(v);
    }
    if let Some(v) = body.transfer_window_close {
        query.push(", window_close = ");
        query.push_bind(v);
    }
    if let Some(v) = body.age_min {
        query.push(", age_min = ");
        query.push_bind(v);
    }
    if let Some(v) = body.age_max {
        query.push(", age_max = ");
        query.push_bind(v);
    }
    for (column, value) in [
        ("fee_min", body.transfer_fee_min_eur),
        ("fee_max", body.transfer_fee_max_eur),
        ("salary_min", body.salary_min_eur),
        ("salary_max", body.salary_max_eur),
        ("bonus", body.bonus_eur),
    ] {
        if let Some(v) = value {
            query.push(format!(", {column} = "));
            query.push_bind(v);
        }
    }
    if let Some(v) = &body.notes {
        query.push(", notes = ");
        query.push_bind(v.clone());
    }
    query.push(" WHERE id = ");
    query.push_bind(id);
    query.push(" AND tenant_id = ");
    query.push_bind(tenant.id);
    query.push(" RETURNING *");

    let updated = query
        .build_query_as::<TransferRequest>()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Request not found".into()))?;

    // Status moves change the dashboard's per-status counts.
    invalidate(&state.cache, RESOURCE, tenant.id, body.status.is_some()).await;
    invalidate(&state.cache, "trials", tenant.id, false).await;
    Ok(ok(RequestView::from(updated)))
}

/// Sets one status on N requests: exactly N rows change or none do.
pub async fn bulk_update_status(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<BulkStatusBody>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;
    let ids = dedup_ids(&body.ids);
    if ids.is_empty() {
        return Err(AppError::BadRequest("No request ids given".into()));
    }
    if ids.len() > MAX_BULK {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_BULK} requests per batch"
        )));
    }

    let mut tx = state.db.begin().await?;
    let updated = sqlx::query(
        "UPDATE requests SET status = $1, updated_at = NOW() WHERE tenant_id = $2 AND id = ANY($3)",
    )
    .bind(body.status)
    .bind(tenant.id)
    .bind(&ids)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated != ids.len() as u64 {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!(
            "{} of {} requests not found",
            ids.len() as u64 - updated,
            ids.len()
        )));
    }
    tx.commit().await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    Ok(ok(json!({ "updated": updated, "status": body.status })))
}

pub async fn delete_request(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_delete()?;
    let deleted = sqlx::query("DELETE FROM requests WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant.id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Request not found".into()));
    }

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    invalidate(&state.cache, "trials", tenant.id, false).await;
    Ok(ok(json!({ "id": id })))
}

pub async fn parse_whatsapp(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<ParseMessageBody>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;
    let text = body.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("Message text is required".into()));
    }
    let client = state
        .completion
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Message parsing is not configured".into()))?;

    let candidates = whatsapp::parse_message(client, text).await?;
    tracing::info!(tenant = %tenant.id, candidates = candidates.len(), "parsed message");
    Ok(ok(json!({ "requests": candidates })))
}

async fn insert_request(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    body: &CreateRequestBody,
) -> AppResult<TransferRequest> {
    let row = sqlx::query_as::<_, TransferRequest>(
        r#"INSERT INTO requests
            (tenant_id, club, country, league, position, deal_type, status, priority,
             window_open, window_close, age_min, age_max, fee_min, fee_max,
             salary_min, salary_max, bonus, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *"#,
    )
    .bind(tenant_id)
    .bind(body.club.trim())
    .bind(&body.country)
    .bind(&body.league)
    .bind(body.position.trim())
    .bind(body.deal_type_column())
    .bind(body.status.unwrap_or(RequestStatus::Open))
    .bind(body.priority.unwrap_or(Priority::Medium))
    .bind(body.transfer_window_open)
    .bind(body.transfer_window_close)
    .bind(body.age_min)
    .bind(body.age_max)
    .bind(body.transfer_fee_min_eur)
    .bind(body.transfer_fee_max_eur)
    .bind(body.salary_min_eur)
    .bind(body.salary_max_eur)
    .bind(body.bonus_eur)
    .bind(&body.notes)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

async fn fetch_request(state: &AppState, tenant_id: Uuid, id: Uuid) -> AppResult<TransferRequest> {
    sqlx::query_as("SELECT * FROM requests WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Request not found".into()))
}

/// First occurrence wins; order is kept.
fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_count_once() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_ids(&[a, b, a]), vec![a, b]);
    }

    #[test]
    fn bulk_status_body_rejects_unknown_status() {
        let raw = json!({ "ids": [Uuid::nil()], "status": "ARCHIVED" });
        assert!(serde_json::from_value::<BulkStatusBody>(raw).is_err());
    }
}
