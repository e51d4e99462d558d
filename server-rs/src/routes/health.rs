use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();
    let cache_ok = state.cache.health_check().await;

    let (code, status) = if db_ok && cache_ok {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(json!({
            "status": status,
            "postgres": db_ok,
            "cache": { "backend": state.cache.backend_name(), "ok": cache_ok },
            "timestamp": chrono::Utc::now(),
        })),
    )
}
