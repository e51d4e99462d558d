use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::tenants::{add_member, insert_tenant, invalidate_member_access};
use super::{created, ok, page, search_pattern};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::access_cache_prefix;
use crate::models::invitation::Invitation;
use crate::models::tenant::{slugify, Role, TenantMembership};
use crate::models::user::{looks_like_email, normalize_email, User};
use crate::services::invitations::generate_token;
use crate::AppState;

#[derive(Deserialize)]
pub struct AdminQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCreateTenant {
    pub name: String,
    pub slug: Option<String>,
    pub owner_email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAddMembership {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperAdminFlag {
    pub is_super_admin: bool,
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Query(q): Query<AdminQuery>,
) -> AppResult<Json<Value>> {
    let (limit, offset) = page(q.limit, q.offset);
    let pattern = search_pattern(q.search.as_deref());

    let rows: Vec<(Uuid, String, String, chrono::DateTime<Utc>, i64)> = sqlx::query_as(
        r#"SELECT t.id, t.name, t.slug, t.created_at, COUNT(m.id)::bigint
        FROM tenants t
        LEFT JOIN tenant_memberships m ON m.tenant_id = t.id
        WHERE $1::text IS NULL OR t.name ILIKE $1 OR t.slug ILIKE $1
        GROUP BY t.id
        ORDER BY t.created_at DESC
        LIMIT $2 OFFSET $3"#,
    )
    .bind(pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let tenants: Vec<Value> = rows.iter().map(|(id, name, slug, created, members)| {
        json!({"id": id, "name": name, "slug": slug, "createdAt": created, "memberCount": members})
    }).collect();
    Ok(ok(tenants))
}

/// Creates a tenant for `ownerEmail`. A known user becomes OWNER at once;
/// anyone else gets an OWNER invitation.
pub async fn create_tenant(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Json(body): Json<AdminCreateTenant>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Tenant name required".into()));
    }
    let slug = slugify(body.slug.as_deref().unwrap_or(name));
    if slug.is_empty() {
        return Err(AppError::BadRequest("Slug must contain letters or digits".into()));
    }
    let email = normalize_email(&body.owner_email);
    if !looks_like_email(&email) {
        return Err(AppError::BadRequest("A valid owner email is required".into()));
    }

    let owner: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let mut tx = state.db.begin().await?;
    let tenant = insert_tenant(&mut tx, name, &slug, None).await?;
    let (membership, invitation) = match &owner {
        Some(user) => (Some(add_member(&mut tx, tenant.id, user.id, Role::Owner).await?), None),
        None => {
            let expires_at = Utc::now() + Duration::days(state.config.invitations.expiry_days);
            let invitation: Invitation = sqlx::query_as(
                r#"INSERT INTO invitations (tenant_id, email, role, token, invited_by, expires_at)
                VALUES ($1, $2, 'OWNER', $3, $4, $5)
                RETURNING *"#,
            )
            .bind(tenant.id)
            .bind(&email)
            .bind(generate_token())
            .bind(admin.id)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;
            (None, Some(invitation))
        }
    };
    tx.commit().await?;

    if let Some(user) = &owner {
        state
            .cache
            .invalidate_pattern(&access_cache_prefix(user.id))
            .await;
    }
    tracing::info!(tenant = %tenant.id, admin = %admin.id, invited = invitation.is_some(), "tenant created by admin");

    let invite_url = invitation
        .as_ref()
        .map(|i| format!("{}/invite/{}", state.config.site_url, i.token));
    Ok(created(json!({
        "tenant": tenant,
        "membership": membership,
        "invitation": invitation,
        "inviteUrl": invite_url,
    })))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let members: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM tenant_memberships WHERE tenant_id = $1")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    let deleted = sqlx::query("DELETE FROM tenants WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Tenant not found".into()));
    }

    invalidate_member_access(&state, &members).await;
    tracing::warn!(tenant = %id, admin = %admin.id, "tenant deleted");
    Ok(ok(json!({ "id": id })))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<AdminQuery>,
) -> AppResult<Json<Value>> {
    let (limit, offset) = page(q.limit, q.offset);
    let users: Vec<User> = sqlx::query_as(
        r#"SELECT * FROM users
        WHERE $1::text IS NULL OR email ILIKE $1 OR first_name ILIKE $1 OR last_name ILIKE $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3"#,
    )
    .bind(search_pattern(q.search.as_deref()))
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;
    Ok(ok(users))
}

pub async fn add_membership(
    State(state): State<AppState>,
    Json(body): Json<AdminAddMembership>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut tx = state.db.begin().await?;
    sqlx::query("SELECT 1 FROM tenants WHERE id = $1")
        .bind(body.tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;
    sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(body.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2)",
    )
    .bind(body.tenant_id)
    .bind(body.user_id)
    .fetch_one(&mut *tx)
    .await?;
    if exists {
        return Err(AppError::Conflict("User is already a member of this tenant".into()));
    }
    let membership = add_member(&mut tx, body.tenant_id, body.user_id, body.role).await?;
    tx.commit().await?;

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(body.user_id))
        .await;
    Ok(created(membership))
}

pub async fn remove_membership(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let removed: TenantMembership =
        sqlx::query_as("DELETE FROM tenant_memberships WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Membership not found".into()))?;

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(removed.user_id))
        .await;
    Ok(ok(removed))
}

pub async fn set_super_admin(
    State(state): State<AppState>,
    admin: axum::Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<SuperAdminFlag>,
) -> AppResult<Json<Value>> {
    if id == admin.id && !body.is_super_admin {
        return Err(AppError::BadRequest("You cannot revoke your own super admin flag".into()));
    }
    let user: User = sqlx::query_as(
        "UPDATE users SET is_super_admin = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(body.is_super_admin)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    tracing::warn!(user = %id, admin = %admin.id, flag = body.is_super_admin, "super admin flag changed");
    Ok(ok(user))
}

