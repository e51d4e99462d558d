use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{created, ok};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::{access_cache_prefix, TenantContext};
use crate::models::tenant::*;
use crate::AppState;

pub async fn list_my_tenants(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let rows: Vec<TenantWithRole> = sqlx::query_as(
        r#"SELECT t.id, t.name, t.slug, t.description, m.role, m.joined_at
        FROM tenants t
        JOIN tenant_memberships m ON m.tenant_id = t.id
        WHERE m.user_id = $1
        ORDER BY m.joined_at"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(ok(rows))
}

/// Creates a tenant with the caller as its OWNER.
pub async fn create_tenant(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    Json(body): Json<CreateTenantRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Tenant name required".into()));
    }
    let slug = slugify(body.slug.as_deref().unwrap_or(name));
    if slug.is_empty() {
        return Err(AppError::BadRequest(
            "Slug must contain letters or digits".into(),
        ));
    }

    let mut tx = state.db.begin().await?;
    // The token may belong to someone who never called /api/me/sync.
    if let Some(email) = &user.email {
        sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(user.id)
            .bind(email.to_lowercase())
            .execute(&mut *tx)
            .await?;
    }
    let tenant = insert_tenant(&mut tx, name, &slug, body.description.as_deref()).await?;
    add_member(&mut tx, tenant.id, user.id, Role::Owner).await?;
    tx.commit().await?;

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(user.id))
        .await;
    tracing::info!(tenant = %tenant.id, slug = %tenant.slug, owner = %user.id, "tenant created");
    Ok(created(json!({ "tenant": tenant, "role": Role::Owner })))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
) -> AppResult<Json<Value>> {
    let row = fetch_tenant(&state, tenant.id).await?;
    let members: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM tenant_memberships WHERE tenant_id = $1")
            .bind(tenant.id)
            .fetch_one(&state.db)
            .await?;
    Ok(ok(json!({
        "tenant": row,
        "role": tenant.role,
        "memberCount": members,
    })))
}

pub async fn update_tenant(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<UpdateTenantRequest>,
) -> AppResult<Json<Value>> {
    tenant.require_member_admin()?;
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::BadRequest("Tenant name cannot be empty".into()));
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE tenants SET updated_at = NOW()");
    if let Some(name) = &body.name {
        query.push(", name = ");
        query.push_bind(name.trim().to_string());
    }
    if let Some(description) = &body.description {
        query.push(", description = ");
        query.push_bind(description.clone());
    }
    query.push(" WHERE id = ");
    query.push_bind(tenant.id);
    query.push(" RETURNING *");

    let row = query
        .build_query_as::<Tenant>()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;

    // Every member's resolved context carries the name.
    let members: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM tenant_memberships WHERE tenant_id = $1")
            .bind(tenant.id)
            .fetch_all(&state.db)
            .await?;
    invalidate_member_access(&state, &members).await;
    Ok(ok(row))
}

pub async fn list_members(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
) -> AppResult<Json<Value>> {
    let members: Vec<MemberView> = sqlx::query_as(
        r#"SELECT m.user_id, u.email, u.first_name, u.last_name, m.role, m.joined_at
        FROM tenant_memberships m
        JOIN users u ON u.id = m.user_id
        WHERE m.tenant_id = $1
        ORDER BY m.joined_at"#,
    )
    .bind(tenant.id)
    .fetch_all(&state.db)
    .await?;
    Ok(ok(members))
}

pub async fn update_member_role(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<UpdateMemberRoleRequest>,
) -> AppResult<Json<Value>> {
    if !tenant.role.can_grant(body.role) {
        return Err(AppError::Forbidden(format!(
            "You cannot assign the {} role",
            body.role
        )));
    }

    let mut tx = state.db.begin().await?;
    let current = member_role(&mut tx, tenant.id, user_id).await?;
    guard_owner_change(&mut tx, &tenant, current, Some(body.role)).await?;

    let updated: TenantMembership = sqlx::query_as(
        "UPDATE tenant_memberships SET role = $1 WHERE tenant_id = $2 AND user_id = $3 RETURNING *",
    )
    .bind(body.role)
    .bind(tenant.id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(user_id))
        .await;
    tracing::info!(tenant = %tenant.id, user = %user_id, from = %current, to = %body.role, "member role changed");
    Ok(ok(updated))
}

/// Admins remove others; any member may remove themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    if user_id != user.id {
        tenant.require_member_admin()?;
    }

    let mut tx = state.db.begin().await?;
    let current = member_role(&mut tx, tenant.id, user_id).await?;
    guard_owner_change(&mut tx, &tenant, current, None).await?;

    sqlx::query("DELETE FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2")
        .bind(tenant.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(user_id))
        .await;
    tracing::info!(tenant = %tenant.id, user = %user_id, "member removed");
    Ok(ok(json!({ "userId": user_id })))
}

pub(crate) async fn insert_tenant(
    conn: &mut PgConnection,
    name: &str,
    slug: &str,
    description: Option<&str>,
) -> AppResult<Tenant> {
    let tenant = sqlx::query_as(
        "INSERT INTO tenants (name, slug, description) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(slug)
    .bind(description)
    .fetch_one(conn)
    .await
    .map_err(|e| match e.as_database_error().and_then(|db| db.code()) {
        Some(code) if code == "23505" => AppError::Conflict(format!("Slug '{slug}' is taken")),
        _ => AppError::Database(e),
    })?;
    Ok(tenant)
}

pub(crate) async fn add_member(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> AppResult<TenantMembership> {
    let membership = sqlx::query_as(
        "INSERT INTO tenant_memberships (tenant_id, user_id, role) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role)
    .fetch_one(conn)
    .await?;
    Ok(membership)
}

pub(crate) async fn invalidate_member_access(state: &AppState, members: &[Uuid]) {
    for user_id in members {
        state
            .cache
            .invalidate_pattern(&access_cache_prefix(*user_id))
            .await;
    }
}

async fn fetch_tenant(state: &AppState, id: Uuid) -> AppResult<Tenant> {
    sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))
}

/// Locks the tenant row, then reads the member's role. Role changes and
/// removals all take the tenant lock first, so they count owners one at a
/// time.
async fn member_role(conn: &mut PgConnection, tenant_id: Uuid, user_id: Uuid) -> AppResult<Role> {
    sqlx::query("SELECT 1 FROM tenants WHERE id = $1 FOR NO KEY UPDATE")
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;

    sqlx::query_scalar(
        "SELECT role FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Member not found".into()))
}

/// Only owners touch owners, and a tenant always keeps one.
async fn guard_owner_change(
    conn: &mut PgConnection,
    tenant: &TenantContext,
    current: Role,
    next: Option<Role>,
) -> AppResult<()> {
    if current != Role::Owner {
        return Ok(());
    }
    if tenant.role != Role::Owner {
        return Err(AppError::Forbidden("Only an owner can change another owner".into()));
    }
    if next == Some(Role::Owner) {
        return Ok(());
    }
    let owners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::bigint FROM tenant_memberships WHERE tenant_id = $1 AND role = 'OWNER'",
    )
    .bind(tenant.id)
    .fetch_one(conn)
    .await?;
    if last_owner(owners) {
        return Err(AppError::Conflict("A tenant must keep at least one owner".into()));
    }
    Ok(())
}

fn last_owner(owner_count: i64) -> bool {
    owner_count <= 1
}
