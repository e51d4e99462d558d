use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use super::tenants::{add_member, insert_tenant};
use super::{created, ok};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::tenant::{slugify, Role, Tenant, TenantWithRole};
use crate::models::user::*;
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

/// Self-service signup: auth identity, user row, tenant and OWNER
/// membership, then a session for the new account.
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let email = normalize_email(&body.email);
    let org_name = body.organization_name.trim();
    let slug = check_signup(&email, &body.password, org_name)?;

    let slug_taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE slug = $1)")
            .bind(&slug)
            .fetch_one(&state.db)
            .await?;
    if slug_taken {
        return Err(AppError::Conflict(format!(
            "An organization called '{org_name}' already exists"
        )));
    }

    let identity = state
        .auth_provider
        .create_user(
            &email,
            &body.password,
            body.first_name.as_deref(),
            body.last_name.as_deref(),
        )
        .await?;

    let (user, tenant) = match persist_signup(&state, identity.id, &email, &body, org_name, &slug).await {
        Ok(rows) => rows,
        Err(e) => {
            // Roll back the identity so the email can sign up again.
            if let Err(cleanup) = state.auth_provider.delete_user(identity.id).await {
                tracing::error!(error = %cleanup, user = %identity.id, "orphaned auth identity");
            }
            return Err(e);
        }
    };
    tracing::info!(user = %user.id, tenant = %tenant.id, "signup completed");

    // A fresh identity can take a moment to become usable for password
    // sign-in; the account stands even when this still fails.
    let session = match state
        .auth_provider
        .sign_in_with_retry(&email, &body.password)
        .await
    {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, user = %user.id, "post-signup sign-in failed");
            None
        }
    };

    Ok(created(json!({
        "user": user,
        "tenant": tenant,
        "session": session,
    })))
}

async fn persist_signup(
    state: &AppState,
    user_id: Uuid,
    email: &str,
    body: &SignupRequest,
    org_name: &str,
    slug: &str,
) -> AppResult<(User, Tenant)> {
    let mut tx = state.db.begin().await?;
    let user: User = sqlx::query_as(
        r#"INSERT INTO users (id, email, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        RETURNING *"#,
    )
    .bind(user_id)
    .bind(email)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .fetch_one(&mut *tx)
    .await?;
    let tenant = insert_tenant(&mut tx, org_name, slug, None).await?;
    add_member(&mut tx, tenant.id, user.id, Role::Owner).await?;
    tx.commit().await?;
    Ok((user, tenant))
}

/// Returns the tenant slug for a valid signup form.
fn check_signup(email: &str, password: &str, org_name: &str) -> AppResult<String> {
    if !looks_like_email(email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if org_name.is_empty() {
        return Err(AppError::BadRequest("Organization name required".into()));
    }
    let slug = slugify(org_name);
    if slug.is_empty() {
        return Err(AppError::BadRequest(
            "Organization name must contain letters or digits".into(),
        ));
    }
    Ok(slug)
}

pub async fn me(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
) -> AppResult<Json<Value>> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?;
    let memberships: Vec<TenantWithRole> = sqlx::query_as(
        r#"SELECT t.id, t.name, t.slug, t.description, m.role, m.joined_at
        FROM tenant_memberships m
        JOIN tenants t ON t.id = m.tenant_id
        WHERE m.user_id = $1
        ORDER BY m.joined_at"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(ok(json!({
        "id": user.id,
        "email": user.email,
        "user": row,
        "memberships": memberships,
    })))
}

/// Upserts the caller's user row from the verified token.
pub async fn sync_me(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    body: Option<Json<SyncUserRequest>>,
) -> AppResult<Json<Value>> {
    let email = user
        .email
        .as_deref()
        .map(normalize_email)
        .ok_or_else(|| AppError::BadRequest("Token carries no email".into()))?;
    let Json(body) = body.unwrap_or_default();

    let row: User = sqlx::query_as(
        r#"INSERT INTO users (id, email, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET
            email = EXCLUDED.email,
            first_name = COALESCE(EXCLUDED.first_name, users.first_name),
            last_name = COALESCE(EXCLUDED.last_name, users.last_name),
            updated_at = NOW()
        RETURNING *"#,
    )
    .bind(user.id)
    .bind(&email)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .fetch_one(&state.db)
    .await?;
    Ok(ok(row))
}
