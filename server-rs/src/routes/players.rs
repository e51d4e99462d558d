use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{created, invalidate, ok, page, search_pattern};
use crate::cache;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::TenantContext;
use crate::models::player::*;
use crate::services::mandate;
use crate::AppState;

const RESOURCE: &str = "players";

pub async fn list_players(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Query(q): Query<PlayerQuery>,
) -> AppResult<Json<Value>> {
    let key = cache::key(RESOURCE, tenant.id, &q);
    if let Some(cached) = state.cache.get_json::<Value>(&key).await {
        return Ok(ok(cached));
    }

    let (limit, offset) = page(q.limit, q.offset);
    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM players WHERE tenant_id = ");
    query.push_bind(tenant.id);

    if let Some(pattern) = search_pattern(q.search.as_deref()) {
        query.push(" AND (first_name ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR last_name ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR (first_name || ' ' || last_name) ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR club ILIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
    if let Some(position) = q.position.as_deref().filter(|p| !p.is_empty()) {
        query.push(" AND ");
        query.push_bind(position.trim().to_uppercase());
        query.push(" = ANY(positions)");
    }
    if let Some(nationality) = q.nationality.as_deref().filter(|n| !n.is_empty()) {
        query.push(" AND nationality ILIKE ");
        query.push_bind(nationality.trim().to_string());
    }
    if let Some(tag) = q.tag.as_deref().filter(|t| !t.is_empty()) {
        query.push(" AND ");
        query.push_bind(tag.trim().to_string());
        query.push(" = ANY(tags)");
    }
    match q.free_agent {
        Some(true) => {
            query.push(" AND club IS NULL");
        }
        Some(false) => {
            query.push(" AND club IS NOT NULL");
        }
        None => {}
    }
    query.push(" ORDER BY last_name, first_name LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let rows: Vec<Player> = query.build_query_as::<Player>().fetch_all(&state.db).await?;
    let today = Utc::now().date_naive();
    let views: Vec<PlayerView> = rows.into_iter().map(|p| PlayerView::new(p, today)).collect();

    let data = serde_json::to_value(&views).map_err(|e| AppError::Internal(e.to_string()))?;
    state.cache.set_json(&key, &data, state.cache.default_ttl()).await;
    Ok(ok(data))
}

pub async fn get_player(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let player = fetch_player(&state, tenant.id, id).await?;
    Ok(ok(PlayerView::new(player, Utc::now().date_naive())))
}

pub async fn create_player(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<CreatePlayerRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_write()?;

    let first_name = body.first_name.trim();
    let last_name = body.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(AppError::BadRequest("First and last name are required".into()));
    }
    check_ratings(&[body.rating_physical, body.rating_technical, body.rating_mental])?;

    let (notes, mandate) = resolve_mandate(body.notes, body.mandate);
    let mandate = mandate.unwrap_or_default();

    let player: Player = sqlx::query_as(
        r#"INSERT INTO players
            (tenant_id, first_name, last_name, date_of_birth, nationality, positions, club,
             contract_expiry, agency_contract_expiry, rating_physical, rating_technical,
             rating_mental, avatar_url, notes, tags, mandate_clubs, mandate_expiry,
             mandate_description, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *"#,
    )
    .bind(tenant.id)
    .bind(first_name)
    .bind(last_name)
    .bind(body.date_of_birth)
    .bind(body.nationality.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()))
    .bind(upper_list(&body.positions))
    .bind(normalize_club(body.club.as_deref()))
    .bind(body.contract_expiry)
    .bind(body.agency_contract_expiry)
    .bind(body.rating_physical)
    .bind(body.rating_technical)
    .bind(body.rating_mental)
    .bind(body.avatar_url)
    .bind(notes)
    .bind(clean_list(&body.tags))
    .bind((!mandate.clubs.is_empty()).then(|| clean_list(&mandate.clubs)))
    .bind(mandate.expiry)
    .bind(mandate.description)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    tracing::info!(tenant = %tenant.id, player = %player.id, "player created");
    Ok(created(PlayerView::new(player, Utc::now().date_naive())))
}

pub async fn update_player(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePlayerRequest>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;

    if body.first_name.as_deref().is_some_and(|n| n.trim().is_empty())
        || body.last_name.as_deref().is_some_and(|n| n.trim().is_empty())
    {
        return Err(AppError::BadRequest("Name cannot be empty".into()));
    }
    check_ratings(&[
        body.rating_physical.flatten(),
        body.rating_technical.flatten(),
        body.rating_mental.flatten(),
    ])?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE players SET updated_at = NOW()");
    if let Some(v) = &body.first_name {
        query.push(", first_name = ");
        query.push_bind(v.trim().to_string());
    }
    if let Some(v) = &body.last_name {
        query.push(", last_name = ");
        query.push_bind(v.trim().to_string());
    }
    if let Some(v) = body.date_of_birth {
        query.push(", date_of_birth = ");
        query.push_bind(v);
    }
    if let Some(v) = &body.nationality {
        query.push(", nationality = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = &body.positions {
        query.push(", positions = ");
        query.push_bind(upper_list(v));
    }
    if let Some(v) = &body.club {
        query.push(", club = ");
        query.push_bind(normalize_club(v.as_deref()));
    }
    if let Some(v) = body.contract_expiry {
        query.push(", contract_expiry = ");
        query.push_bind(v);
    }
    if let Some(v) = body.agency_contract_expiry {
        query.push(", agency_contract_expiry = ");
        query.push_bind(v);
    }
    for (column, value) in [
        ("rating_physical", body.rating_physical),
        ("rating_technical", body.rating_technical),
        ("rating_mental", body.rating_mental),
    ] {
        if let Some(v) = value {
            query.push(format!(", {column} = "));
            query.push_bind(v);
        }
    }
    if let Some(v) = &body.avatar_url {
        query.push(", avatar_url = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = &body.tags {
        query.push(", tags = ");
        query.push_bind(clean_list(v));
    }

    // Notes written with an embedded mandate block are split the same way
    // as on create, unless the body sets the mandate explicitly.
    let mut mandate_patch = body.mandate.clone();
    if let Some(notes) = &body.notes {
        let (rest, legacy) = match notes.as_deref() {
            Some(n) => mandate::split_notes(n),
            None => (None, None),
        };
        query.push(", notes = ");
        query.push_bind(rest);
        if mandate_patch.is_none() && legacy.is_some() {
            mandate_patch = Some(legacy);
        }
    }
    if let Some(m) = mandate_patch {
        let m = m.unwrap_or_default();
        query.push(", mandate_clubs = ");
        query.push_bind((!m.clubs.is_empty()).then(|| clean_list(&m.clubs)));
        query.push(", mandate_expiry = ");
        query.push_bind(m.expiry);
        query.push(", mandate_description = ");
        query.push_bind(m.description);
    }

    query.push(" WHERE id = ");
    query.push_bind(id);
    query.push(" AND tenant_id = ");
    query.push_bind(tenant.id);
    query.push(" RETURNING *");

    let player: Player = query
        .build_query_as::<Player>()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Player not found".into()))?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    if body.first_name.is_some() || body.last_name.is_some() {
        // Trial lists carry the player's name.
        invalidate(&state.cache, "trials", tenant.id, false).await;
    }
    Ok(ok(PlayerView::new(player, Utc::now().date_naive())))
}

pub async fn delete_player(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_delete()?;

    let mut tx = state.db.begin().await?;
    // Trials go with the player through the cascade; their events are
    // removed here so none are left pointing at nothing.
    sqlx::query(
        r#"DELETE FROM calendar_events
        WHERE tenant_id = $1
          AND trial_id IN (SELECT id FROM trials WHERE player_id = $2 AND tenant_id = $1)"#,
    )
    .bind(tenant.id)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let deleted = sqlx::query("DELETE FROM players WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Player not found".into()));
    }
    tx.commit().await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    invalidate(&state.cache, "trials", tenant.id, false).await;
    invalidate(&state.cache, "calendar", tenant.id, false).await;
    Ok(ok(serde_json::json!({ "id": id })))
}

async fn fetch_player(state: &AppState, tenant_id: Uuid, id: Uuid) -> AppResult<Player> {
    sqlx::query_as("SELECT * FROM players WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Player not found".into()))
}

fn check_ratings(ratings: &[Option<i16>]) -> AppResult<()> {
    if ratings.iter().all(|r| valid_rating(*r)) {
        Ok(())
    } else {
        Err(AppError::BadRequest("Ratings must be between 0 and 100".into()))
    }
}

fn upper_list(items: &[String]) -> Vec<String> {
    clean_list(items).into_iter().map(|s| s.to_uppercase()).collect()
}

/// An explicit mandate wins; otherwise a block embedded in the notes is
/// lifted out into the structured columns.
fn resolve_mandate(
    notes: Option<String>,
    explicit: Option<Mandate>,
) -> (Option<String>, Option<Mandate>) {
    let (notes, legacy) = match notes.as_deref() {
        Some(n) => mandate::split_notes(n),
        None => (None, None),
    };
    (notes, explicit.filter(|m| !m.is_empty()).or(legacy))
}
