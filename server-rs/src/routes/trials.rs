use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{created, invalidate, ok};
use crate::cache;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::TenantContext;
use crate::models::trial::*;
use crate::services::trial_sync;
use crate::AppState;

const RESOURCE: &str = "trials";

const VIEW_SELECT: &str = r#"SELECT t.id, t.player_id,
        (p.first_name || ' ' || p.last_name) AS player_name,
        t.request_id, r.club AS request_club, t.status, t.rating, t.scheduled_at,
        t.location, t.notes, e.id AS calendar_event_id, t.created_at, t.updated_at
    FROM trials t
    JOIN players p ON p.id = t.player_id
    LEFT JOIN requests r ON r.id = t.request_id
    LEFT JOIN calendar_events e ON e.trial_id = t.id
    WHERE t.tenant_id = "#;

pub async fn list_trials(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Query(q): Query<TrialQuery>,
) -> AppResult<Json<Value>> {
    let key = cache::key(RESOURCE, tenant.id, &q);
    if let Some(cached) = state.cache.get_json::<Value>(&key).await {
        return Ok(ok(cached));
    }

    let mut query = QueryBuilder::<Postgres>::new(VIEW_SELECT);
    query.push_bind(tenant.id);
    if let Some(player_id) = q.player_id {
        query.push(" AND t.player_id = ");
        query.push_bind(player_id);
    }
    if let Some(request_id) = q.request_id {
        query.push(" AND t.request_id = ");
        query.push_bind(request_id);
    }
    if let Some(status) = q.status {
        query.push(" AND t.status = ");
        query.push_bind(status);
    }
    if let Some(from) = q.from {
        query.push(" AND t.scheduled_at >= ");
        query.push_bind(from);
    }
    if let Some(to) = q.to {
        query.push(" AND t.scheduled_at < ");
        query.push_bind(to);
    }
    query.push(" ORDER BY t.scheduled_at");

    let rows = query
        .build_query_as::<TrialView>()
        .fetch_all(&state.db)
        .await?;
    let data = serde_json::to_value(&rows).map_err(|e| AppError::Internal(e.to_string()))?;
    state.cache.set_json(&key, &data, state.cache.default_ttl()).await;
    Ok(ok(data))
}

pub async fn get_trial(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db.acquire().await?;
    let view = fetch_view(&mut conn, tenant.id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Trial not found".into()))?;
    Ok(ok(view))
}

/// Inserts the trial and its TRIAL calendar event in one transaction.
pub async fn create_trial(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<CreateTrialBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_write()?;
    if !valid_trial_rating(body.rating) {
        return Err(AppError::BadRequest("Rating must be between 1 and 10".into()));
    }

    let mut tx = state.db.begin().await?;
    let player_name = player_name(&mut tx, tenant.id, body.player_id).await?;
    if let Some(request_id) = body.request_id {
        ensure_request(&mut tx, tenant.id, request_id).await?;
    }

    let trial: Trial = sqlx::query_as(
        r#"INSERT INTO trials (tenant_id, player_id, request_id, status, rating, scheduled_at, location, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *"#,
    )
    .bind(tenant.id)
    .bind(body.player_id)
    .bind(body.request_id)
    .bind(body.status.unwrap_or(TrialStatus::Scheduled))
    .bind(body.rating)
    .bind(body.scheduled_at)
    .bind(&body.location)
    .bind(&body.notes)
    .fetch_one(&mut *tx)
    .await?;

    let event = trial_sync::create_event(&mut tx, &trial, &player_name, user.id).await?;
    let view = fetch_view(&mut tx, tenant.id, trial.id)
        .await?
        .ok_or_else(|| AppError::Internal("trial vanished inside its own transaction".into()))?;
    tx.commit().await?;

    invalidate_all(&state, tenant.id).await;
    tracing::info!(tenant = %tenant.id, trial = %trial.id, event = %event.id, "trial scheduled");
    Ok(created(json!({ "trial": view, "event": event })))
}

/// Applies the patch and moves the linked event with it.
pub async fn update_trial(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTrialBody>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;
    if !valid_trial_rating(body.rating.flatten()) {
        return Err(AppError::BadRequest("Rating must be between 1 and 10".into()));
    }

    let mut tx = state.db.begin().await?;
    if let Some(Some(request_id)) = body.request_id {
        ensure_request(&mut tx, tenant.id, request_id).await?;
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE trials SET updated_at = NOW()");
    if let Some(v) = body.request_id {
        query.push(", request_id = ");
        query.push_bind(v);
    }
    if let Some(v) = body.scheduled_at {
        query.push(", scheduled_at = ");
        query.push_bind(v);
    }
    if let Some(v) = body.status {
        query.push(", status = ");
        query.push_bind(v);
    }
    if let Some(v) = body.rating {
        query.push(", rating = ");
        query.push_bind(v);
    }
    if let Some(v) = &body.location {
        query.push(", location = ");
        query.push_bind(v.clone());
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

    let trial = query
        .build_query_as::<Trial>()
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Trial not found".into()))?;

    let name = player_name(&mut tx, tenant.id, trial.player_id).await?;
    let event = trial_sync::sync_event(&mut tx, &trial, &name).await?;
    let view = fetch_view(&mut tx, tenant.id, trial.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Trial not found".into()))?;
    tx.commit().await?;

    invalidate_all(&state, tenant.id).await;
    Ok(ok(json!({ "trial": view, "event": event })))
}

/// Removes the trial and its linked event together. A second delete of the
/// same id is a 404.
pub async fn delete_trial(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_delete()?;

    let mut tx = state.db.begin().await?;
    let events = trial_sync::delete_event(&mut tx, tenant.id, id).await?;
    let deleted = sqlx::query("DELETE FROM trials WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Trial not found".into()));
    }
    tx.commit().await?;

    invalidate_all(&state, tenant.id).await;
    Ok(ok(json!({ "id": id, "deletedEvents": events })))
}

async fn invalidate_all(state: &AppState, tenant_id: Uuid) {
    invalidate(&state.cache, RESOURCE, tenant_id, true).await;
    invalidate(&state.cache, "calendar", tenant_id, false).await;
}

async fn fetch_view(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    id: Uuid,
) -> Result<Option<TrialView>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(VIEW_SELECT);
    query.push_bind(tenant_id);
    query.push(" AND t.id = ");
    query.push_bind(id);
    query.build_query_as::<TrialView>().fetch_optional(conn).await
}

async fn player_name(conn: &mut PgConnection, tenant_id: Uuid, player_id: Uuid) -> AppResult<String> {
    sqlx::query_scalar(
        "SELECT first_name || ' ' || last_name FROM players WHERE id = $1 AND tenant_id = $2",
    )
    .bind(player_id)
    .bind(tenant_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Player not found".into()))
}

async fn ensure_request(conn: &mut PgConnection, tenant_id: Uuid, request_id: Uuid) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM requests WHERE id = $1 AND tenant_id = $2)",
    )
    .bind(request_id)
    .bind(tenant_id)
    .fetch_one(conn)
    .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Request not found".into()))
    }
}
