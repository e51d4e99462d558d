use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::tenant::Role;
use crate::AppState;

/// The tenant a request is scoped to and the caller's role in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub role: Role,
}

impl TenantContext {
    /// Creating and editing players, requests, trials and events.
    pub fn require_write(&self) -> AppResult<()> {
        gate(self.role.can_write(), Role::Scout)
    }

    pub fn require_delete(&self) -> AppResult<()> {
        gate(self.role.can_delete(), Role::Manager)
    }

    /// Inviting, re-roling and removing members; editing the tenant.
    pub fn require_member_admin(&self) -> AppResult<()> {
        gate(self.role.can_manage_members(), Role::Admin)
    }
}

fn gate(allowed: bool, min: Role) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Requires {min} role or higher")))
    }
}

#[derive(Debug, Deserialize)]
struct TenantParam {
    tenant: Option<String>,
}

pub fn access_cache_prefix(user_id: Uuid) -> String {
    format!("tenant-access:{user_id}:")
}

/// Middleware: resolves `?tenant=` (slug or id) for the authenticated user.
/// Must run inside `authenticate`.
pub async fn resolve_tenant(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let user = parts
        .extensions
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    let Query(param) = parts
        .extract::<Query<TenantParam>>()
        .await
        .map_err(|_| AppError::BadRequest("Invalid query string".into()))?;
    let tenant = param
        .tenant
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing tenant parameter".into()))?;

    let context = load_context(&state, user.id, &tenant).await?;
    parts.extensions.insert(context);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

async fn load_context(state: &AppState, user_id: Uuid, tenant: &str) -> AppResult<TenantContext> {
    let cache_key = format!("{}{tenant}", access_cache_prefix(user_id));
    if let Some(cached) = state.cache.get_json::<TenantContext>(&cache_key).await {
        return Ok(cached);
    }

    let row: Option<(Uuid, String, String)> = match Uuid::parse_str(tenant) {
        Ok(id) => {
            sqlx::query_as("SELECT id, slug, name FROM tenants WHERE id = $1")
                .bind(id)
                .fetch_optional(&state.db)
                .await?
        }
        Err(_) => {
            sqlx::query_as("SELECT id, slug, name FROM tenants WHERE slug = $1")
                .bind(tenant.to_lowercase())
                .fetch_optional(&state.db)
                .await?
        }
    };
    let (id, slug, name) = row.ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;

    let role: Role = sqlx::query_scalar(
        "SELECT role FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Forbidden("You are not a member of this tenant".into()))?;

    let context = TenantContext { id, slug, name, role };
    state
        .cache
        .set_json(&cache_key, &context, state.cache.default_ttl())
        .await;
    Ok(context)
}
