use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{created, invalidate, ok};
use crate::cache;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::TenantContext;
use crate::models::calendar::*;
use crate::services::{feed_token, ics};
use crate::AppState;

const RESOURCE: &str = "calendar";

pub async fn list_events(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Query(q): Query<CalendarQuery>,
) -> AppResult<Json<Value>> {
    let key = cache::key(RESOURCE, tenant.id, &q);
    if let Some(cached) = state.cache.get_json::<Value>(&key).await {
        return Ok(ok(cached));
    }

    let mut query =
        QueryBuilder::<Postgres>::new("SELECT * FROM calendar_events WHERE tenant_id = ");
    query.push_bind(tenant.id);
    if let Some(start) = q.start {
        // Recurring events may repeat into the range from before it.
        query.push(" AND (end_time >= ");
        query.push_bind(start);
        query.push(" OR recurrence IS NOT NULL)");
    }
    if let Some(end) = q.end {
        query.push(" AND start_time < ");
        query.push_bind(end);
    }
    if let Some(event_type) = q.event_type {
        query.push(" AND event_type = ");
        query.push_bind(event_type);
    }
    query.push(" ORDER BY start_time");

    let events = query
        .build_query_as::<CalendarEvent>()
        .fetch_all(&state.db)
        .await?;
    let data = serde_json::to_value(&events).map_err(|e| AppError::Internal(e.to_string()))?;
    state.cache.set_json(&key, &data, state.cache.default_ttl()).await;
    Ok(ok(data))
}

pub async fn get_event(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    Ok(ok(fetch_event(&state, tenant.id, id).await?))
}

pub async fn create_event(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<CreateEventBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_write()?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Title is required".into()));
    }
    let end = body
        .end_time
        .unwrap_or_else(|| default_end(body.start_time, body.all_day));
    check_window(body.start_time, end)?;
    let recurrence = recurrence(body.recurrence.as_deref())?;

    let event: CalendarEvent = sqlx::query_as(
        r#"INSERT INTO calendar_events
            (tenant_id, title, description, event_type, start_time, end_time, all_day, location, recurrence, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *"#,
    )
    .bind(tenant.id)
    .bind(title)
    .bind(&body.description)
    .bind(body.event_type.unwrap_or(EventType::Other))
    .bind(body.start_time)
    .bind(end)
    .bind(body.all_day)
    .bind(&body.location)
    .bind(recurrence)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    Ok(created(event))
}

pub async fn update_event(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateEventBody>,
) -> AppResult<Json<Value>> {
    tenant.require_write()?;
    let current = fetch_event(&state, tenant.id, id).await?;

    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::BadRequest("Title cannot be empty".into()));
    }
    let start = body.start_time.unwrap_or(current.start_time);
    let end = match body.end_time {
        Some(end) => end,
        // Moving the start alone keeps the event's length.
        None => start + (current.end_time - current.start_time),
    };
    check_window(start, end)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE calendar_events SET updated_at = NOW()");
    if let Some(v) = &body.title {
        query.push(", title = ");
        query.push_bind(v.trim().to_string());
    }
    if let Some(v) = &body.description {
        query.push(", description = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = body.event_type {
        query.push(", event_type = ");
        query.push_bind(v);
    }
    query.push(", start_time = ");
    query.push_bind(start);
    query.push(", end_time = ");
    query.push_bind(end);
    if let Some(v) = body.all_day {
        query.push(", all_day = ");
        query.push_bind(v);
    }
    if let Some(v) = &body.location {
        query.push(", location = ");
        query.push_bind(v.clone());
    }
    if let Some(v) = &body.recurrence {
        query.push(", recurrence = ");
        query.push_bind(recurrence(v.as_deref())?);
    }
    query.push(" WHERE id = ");
    query.push_bind(id);
    query.push(" AND tenant_id = ");
    query.push_bind(tenant.id);
    query.push(" RETURNING *");

    let event = query
        .build_query_as::<CalendarEvent>()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".into()))?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    Ok(ok(event))
}

/// Deleting a trial's event directly leaves the trial in place.
pub async fn delete_event(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_delete()?;
    let trial_id: Option<Option<Uuid>> = sqlx::query_scalar(
        "DELETE FROM calendar_events WHERE id = $1 AND tenant_id = $2 RETURNING trial_id",
    )
    .bind(id)
    .bind(tenant.id)
    .fetch_optional(&state.db)
    .await?;
    let trial_id = trial_id.ok_or_else(|| AppError::NotFound("Event not found".into()))?;

    invalidate(&state.cache, RESOURCE, tenant.id, true).await;
    if trial_id.is_some() {
        invalidate(&state.cache, "trials", tenant.id, false).await;
    }
    Ok(ok(json!({ "id": id })))
}

pub async fn feed_url(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
) -> AppResult<Json<Value>> {
    let token = feed_token::sign(&state.config.calendar.feed_secret, tenant.id);
    let url = format!(
        "{}/api/calendar/feed/{}?token={token}",
        state.config.site_url, tenant.id
    );
    Ok(ok(json!({ "url": url })))
}

/// Public `.ics` subscription feed, authorized by the signed token.
pub async fn feed(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Query(q): Query<FeedQuery>,
) -> AppResult<impl IntoResponse> {
    if !feed_token::verify(&state.config.calendar.feed_secret, tenant_id, &q.token) {
        return Err(AppError::Unauthorized("Invalid feed token".into()));
    }
    let name: String = sqlx::query_scalar("SELECT name FROM tenants WHERE id = $1")
        .bind(tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;

    let since = Utc::now() - Duration::days(state.config.calendar.feed_lookback_days);
    let events: Vec<CalendarEvent> = sqlx::query_as(
        r#"SELECT * FROM calendar_events
        WHERE tenant_id = $1 AND (end_time >= $2 OR recurrence IS NOT NULL)
        ORDER BY start_time"#,
    )
    .bind(tenant_id)
    .bind(since)
    .fetch_all(&state.db)
    .await?;

    let body = ics::render_calendar(&name, &events, Utc::now());
    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"calendar.ics\""),
            (header::CACHE_CONTROL, "private, max-age=300"),
        ],
        body,
    ))
}

async fn fetch_event(state: &AppState, tenant_id: Uuid, id: Uuid) -> AppResult<CalendarEvent> {
    sqlx::query_as("SELECT * FROM calendar_events WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".into()))
}

fn default_end(start: DateTime<Utc>, all_day: bool) -> DateTime<Utc> {
    if all_day {
        start
    } else {
        start + Duration::hours(1)
    }
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if end < start {
        return Err(AppError::BadRequest("Event ends before it starts".into()));
    }
    Ok(())
}

fn recurrence(raw: Option<&str>) -> AppResult<Option<String>> {
    match raw {
        Some(rule) => ics::normalize_rrule(rule).map_err(AppError::BadRequest),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timed_events_default_to_one_hour() {
        let start = Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap();
        assert_eq!(default_end(start, false) - start, Duration::hours(1));
        assert_eq!(default_end(start, true), start);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let start = Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap();
        assert!(check_window(start, start).is_ok());
        assert!(check_window(start, start - Duration::minutes(1)).is_err());
    }

    #[test]
    fn bad_recurrence_is_bad_request() {
        assert_eq!(recurrence(Some("rrule:freq=daily")).unwrap().as_deref(), Some("FREQ=DAILY"));
        assert!(recurrence(Some("FREQ=SOMETIMES")).is_err());
        assert_eq!(recurrence(None).unwrap(), None);
    }
}
