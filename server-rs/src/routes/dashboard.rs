use std::collections::BTreeMap;

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use super::ok;
use crate::cache;
use crate::error::{AppError, AppResult};
use crate::middleware::tenant::TenantContext;
use crate::models::request::RequestStatus;
use crate::AppState;

const UPCOMING_DAYS: i64 = 7;
const CONTRACT_HORIZON_DAYS: i64 = 180;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub players: i64,
    pub active_requests: i64,
    pub requests_by_status: BTreeMap<String, i64>,
    pub upcoming_trials: i64,
    pub upcoming_events: i64,
    pub expiring_contracts: i64,
}

pub async fn stats(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
) -> AppResult<Json<Value>> {
    let key = cache::dashboard_key(tenant.id);
    if let Some(cached) = state.cache.get_json::<Value>(&key).await {
        return Ok(ok(cached));
    }

    let tid = tenant.id;
    let now = Utc::now();
    let week = now + Duration::days(UPCOMING_DAYS);
    let horizon = (now + Duration::days(CONTRACT_HORIZON_DAYS)).date_naive();

    let players: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM players WHERE tenant_id = $1")
            .bind(tid)
            .fetch_one(&state.db)
            .await?;
    let by_status: Vec<(RequestStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*)::bigint FROM requests WHERE tenant_id = $1 GROUP BY status",
    )
    .bind(tid)
    .fetch_all(&state.db)
    .await?;
    let upcoming_trials: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*)::bigint FROM trials
        WHERE tenant_id = $1 AND scheduled_at >= $2 AND scheduled_at < $3 AND status <> 'CANCELLED'"#,
    )
    .bind(tid)
    .bind(now)
    .bind(week)
    .fetch_one(&state.db)
    .await?;
    let upcoming_events: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*)::bigint FROM calendar_events
        WHERE tenant_id = $1 AND start_time >= $2 AND start_time < $3"#,
    )
    .bind(tid)
    .bind(now)
    .bind(week)
    .fetch_one(&state.db)
    .await?;
    let expiring_contracts: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*)::bigint FROM players
        WHERE tenant_id = $1 AND contract_expiry >= $2 AND contract_expiry <= $3"#,
    )
    .bind(tid)
    .bind(now.date_naive())
    .bind(horizon)
    .fetch_one(&state.db)
    .await?;

    let (requests_by_status, active_requests) = tally_requests(&by_status);
    let stats = DashboardStats {
        players,
        active_requests,
        requests_by_status,
        upcoming_trials,
        upcoming_events,
        expiring_contracts,
    };
    let data = serde_json::to_value(&stats).map_err(|e| AppError::Internal(e.to_string()))?;
    state.cache.set_json(&key, &data, state.cache.default_ttl()).await;
    Ok(ok(data))
}

/// Every status gets a bucket; active means not COMPLETED or CANCELLED.
fn tally_requests(rows: &[(RequestStatus, i64)]) -> (BTreeMap<String, i64>, i64) {
    let mut buckets: BTreeMap<String, i64> = RequestStatus::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    let mut active = 0;
    for (status, count) in rows {
        *buckets.entry(status.to_string()).or_default() += count;
        if !status.is_terminal() {
            active += count;
        }
    }
    (buckets, active)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_fills_missing_statuses() {
        let (buckets, active) = tally_requests(&[
            (RequestStatus::Open, 4),
            (RequestStatus::OfferSent, 1),
            (RequestStatus::Completed, 7),
        ]);
        assert_eq!(buckets.len(), 6);
        assert_eq!(buckets["OPEN"], 4);
        assert_eq!(buckets["IN_PROGRESS"], 0);
        assert_eq!(buckets["COMPLETED"], 7);
        assert_eq!(active, 5);
    }
}
