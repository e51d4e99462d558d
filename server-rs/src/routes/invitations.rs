use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{created, ok};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::tenant::{access_cache_prefix, TenantContext};
use crate::models::invitation::*;
use crate::models::tenant::Role;
use crate::models::user::{looks_like_email, normalize_email, User};
use crate::services::auth_provider::AuthProviderError;
use crate::services::invitations::{acceptance_error, generate_token};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// Where an accepted token was found.
enum Found {
    Db(Invitation),
    Legacy(LegacyInvitation),
}

impl Found {
    fn tenant_id(&self) -> Uuid {
        match self {
            Found::Db(i) => i.tenant_id,
            Found::Legacy(l) => l.tenant_id,
        }
    }

    fn email(&self) -> &str {
        match self {
            Found::Db(i) => &i.email,
            Found::Legacy(l) => &l.email,
        }
    }

    fn role(&self) -> Role {
        match self {
            Found::Db(i) => i.role,
            Found::Legacy(l) => l.role,
        }
    }
}

fn invite_url(state: &AppState, token: &str) -> String {
    format!("{}/invite/{token}", state.config.site_url)
}

pub async fn create_invitation(
    State(state): State<AppState>,
    user: axum::Extension<AuthUser>,
    tenant: axum::Extension<TenantContext>,
    Json(body): Json<CreateInvitationRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    tenant.require_member_admin()?;
    let email = normalize_email(&body.email);
    if !looks_like_email(&email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    let role = body.role.unwrap_or(Role::Scout);
    if !tenant.role.can_grant(role) {
        return Err(AppError::Forbidden(format!("You cannot invite members as {role}")));
    }

    let is_member: bool = sqlx::query_scalar(
        r#"SELECT EXISTS(
            SELECT 1 FROM tenant_memberships m JOIN users u ON u.id = m.user_id
            WHERE m.tenant_id = $1 AND u.email = $2)"#,
    )
    .bind(tenant.id)
    .bind(&email)
    .fetch_one(&state.db)
    .await?;
    if is_member {
        return Err(AppError::Conflict("This user is already a member".into()));
    }

    let existing: Option<Invitation> = sqlx::query_as(
        r#"SELECT * FROM invitations
        WHERE tenant_id = $1 AND email = $2 AND status = 'PENDING' AND expires_at > NOW()
        ORDER BY created_at DESC LIMIT 1"#,
    )
    .bind(tenant.id)
    .bind(&email)
    .fetch_optional(&state.db)
    .await?;
    if let Some(invitation) = existing {
        let url = invite_url(&state, &invitation.token);
        return Ok((
            StatusCode::OK,
            ok(json!({ "invitation": invitation, "inviteUrl": url })),
        ));
    }

    let expires_at = Utc::now() + Duration::days(state.config.invitations.expiry_days);
    let invitation: Invitation = sqlx::query_as(
        r#"INSERT INTO invitations (tenant_id, email, role, token, invited_by, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *"#,
    )
    .bind(tenant.id)
    .bind(&email)
    .bind(role)
    .bind(generate_token())
    .bind(user.id)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(tenant = %tenant.id, invitation = %invitation.id, %role, "invitation created");
    let url = invite_url(&state, &invitation.token);
    Ok(created(json!({ "invitation": invitation, "inviteUrl": url })))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
) -> AppResult<Json<Value>> {
    tenant.require_member_admin()?;
    let mut rows: Vec<Invitation> =
        sqlx::query_as("SELECT * FROM invitations WHERE tenant_id = $1 ORDER BY created_at DESC")
            .bind(tenant.id)
            .fetch_all(&state.db)
            .await?;
    let now = Utc::now();
    for row in &mut rows {
        row.status = row.effective_status(now);
    }
    Ok(ok(rows))
}

pub async fn cancel_invitation(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_member_admin()?;
    let cancelled: Option<Invitation> = sqlx::query_as(
        r#"UPDATE invitations SET status = 'CANCELLED'
        WHERE id = $1 AND tenant_id = $2 AND status = 'PENDING'
        RETURNING *"#,
    )
    .bind(id)
    .bind(tenant.id)
    .fetch_optional(&state.db)
    .await?;

    match cancelled {
        Some(invitation) => Ok(ok(invitation)),
        None => Err(not_pending(&state, tenant.id, id).await),
    }
}

/// Issues a fresh token and expiry for a pending invitation.
pub async fn resend_invitation(
    State(state): State<AppState>,
    tenant: axum::Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    tenant.require_member_admin()?;
    let expires_at = Utc::now() + Duration::days(state.config.invitations.expiry_days);
    let refreshed: Option<Invitation> = sqlx::query_as(
        r#"UPDATE invitations SET token = $1, expires_at = $2
        WHERE id = $3 AND tenant_id = $4 AND status = 'PENDING'
        RETURNING *"#,
    )
    .bind(generate_token())
    .bind(expires_at)
    .bind(id)
    .bind(tenant.id)
    .fetch_optional(&state.db)
    .await?;

    match refreshed {
        Some(invitation) => {
            let url = invite_url(&state, &invitation.token);
            Ok(ok(json!({ "invitation": invitation, "inviteUrl": url })))
        }
        None => Err(not_pending(&state, tenant.id, id).await),
    }
}

async fn not_pending(state: &AppState, tenant_id: Uuid, id: Uuid) -> AppError {
    let status: Result<Option<InvitationStatus>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM invitations WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&state.db)
            .await;
    match status {
        Ok(Some(status)) if status.is_terminal() => {
            AppError::Conflict(format!("Invitation is {status}, not PENDING"))
        }
        Ok(Some(_)) => AppError::Conflict("Invitation changed concurrently, retry".into()),
        Ok(None) => AppError::NotFound("Invitation not found".into()),
        Err(e) => e.into(),
    }
}

/// Public: what the invite page shows before the user accepts.
pub async fn lookup_invitation(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> AppResult<Json<Value>> {
    let found = find_by_token(&state, q.token.trim()).await?;
    let now = Utc::now();
    let (status, expires_at) = match &found {
        Found::Db(i) => (i.effective_status(now), i.expires_at),
        Found::Legacy(l) => (effective_status(l.status, l.expires_at, now), l.expires_at),
    };
    let tenant_name: Option<String> = sqlx::query_scalar("SELECT name FROM tenants WHERE id = $1")
        .bind(found.tenant_id())
        .fetch_optional(&state.db)
        .await?;

    Ok(ok(json!({
        "tenantName": tenant_name,
        "email": found.email(),
        "role": found.role(),
        "status": status,
        "expiresAt": expires_at,
    })))
}

/// Public: joins the tenant, creating the account first when the email
/// has none.
pub async fn accept_invitation(
    State(state): State<AppState>,
    Json(body): Json<AcceptInvitationRequest>,
) -> AppResult<Json<Value>> {
    let token = body.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Token is required".into()));
    }
    let found = find_by_token(&state, token).await?;
    let now = Utc::now();

    let rejection = match &found {
        Found::Db(i) => acceptance_error(i.status, i.expires_at, now),
        Found::Legacy(l) => acceptance_error(l.status, l.expires_at, now),
    };
    if let Some(err) = rejection {
        if let Found::Db(i) = &found {
            if !i.status.is_terminal() {
                sqlx::query("UPDATE invitations SET status = 'EXPIRED' WHERE id = $1 AND status = 'PENDING'")
                    .bind(i.id)
                    .execute(&state.db)
                    .await?;
            }
        }
        return Err(err);
    }

    let tenant_id = found.tenant_id();
    let email = normalize_email(found.email());
    let role = found.role();

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if let Some(user) = &existing {
        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2)",
        )
        .bind(tenant_id)
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;
        if is_member {
            return Err(AppError::Conflict("You are already a member of this tenant".into()));
        }
    }

    // New accounts get an auth identity before any row is written.
    let new_identity = match &existing {
        Some(_) => None,
        None => {
            let password = body
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::BadRequest("Password is required to create your account".into()))?;
            if password.len() < MIN_PASSWORD_LEN {
                return Err(AppError::BadRequest(format!(
                    "Password must be at least {MIN_PASSWORD_LEN} characters"
                )));
            }
            Some(
                state
                    .auth_provider
                    .create_user(
                        &email,
                        password,
                        body.first_name.as_deref(),
                        body.last_name.as_deref(),
                    )
                    .await?,
            )
        }
    };

    let result = commit_acceptance(
        &state,
        &found,
        existing.as_ref().map(|u| u.id),
        new_identity.as_ref().map(|p| p.id),
        &email,
        &body,
    )
    .await;

    let user_id = match result {
        Ok(id) => id,
        Err(e) => {
            if let Some(identity) = &new_identity {
                if let Err(cleanup) = state.auth_provider.delete_user(identity.id).await {
                    tracing::error!(error = %cleanup, user = %identity.id, "orphaned auth identity");
                }
            }
            return Err(e);
        }
    };

    if let Found::Legacy(legacy) = &found {
        if let Err(e) = state.auth_provider.mark_invitation_accepted(&legacy.id, now).await {
            tracing::warn!(error = %e, invitation = %legacy.id, "could not mark legacy invitation accepted");
        }
    }

    state
        .cache
        .invalidate_pattern(&access_cache_prefix(user_id))
        .await;
    tracing::info!(tenant = %tenant_id, user = %user_id, %role, "invitation accepted");

    let tenant: (Uuid, String, String) =
        sqlx::query_as("SELECT id, name, slug FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_one(&state.db)
            .await?;
    Ok(ok(json!({
        "tenant": { "id": tenant.0, "name": tenant.1, "slug": tenant.2 },
        "role": role,
        "accountCreated": new_identity.is_some(),
    })))
}

async fn commit_acceptance(
    state: &AppState,
    found: &Found,
    existing_user: Option<Uuid>,
    new_identity: Option<Uuid>,
    email: &str,
    body: &AcceptInvitationRequest,
) -> AppResult<Uuid> {
    let mut tx = state.db.begin().await?;

    let user_id = match (existing_user, new_identity) {
        (Some(id), _) => id,
        (None, Some(id)) => {
            sqlx::query(
                "INSERT INTO users (id, email, first_name, last_name) VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(email)
            .bind(&body.first_name)
            .bind(&body.last_name)
            .execute(&mut *tx)
            .await?;
            id
        }
        (None, None) => return Err(AppError::Internal("no user for invitation".into())),
    };

    sqlx::query("INSERT INTO tenant_memberships (tenant_id, user_id, role) VALUES ($1, $2, $3)")
        .bind(found.tenant_id())
        .bind(user_id)
        .bind(found.role())
        .execute(&mut *tx)
        .await?;

    if let Found::Db(invitation) = found {
        let marked = sqlx::query(
            r#"UPDATE invitations SET status = 'ACCEPTED', accepted_at = NOW()
            WHERE id = $1 AND status = 'PENDING'"#,
        )
        .bind(invitation.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if marked == 0 {
            return Err(AppError::Gone("Invitation is no longer pending".into()));
        }
    }

    tx.commit().await?;
    Ok(user_id)
}

/// Database store first, then the auth provider's legacy table.
async fn find_by_token(state: &AppState, token: &str) -> AppResult<Found> {
    if token.is_empty() {
        return Err(AppError::NotFound("Invitation not found".into()));
    }
    let row: Option<Invitation> = sqlx::query_as("SELECT * FROM invitations WHERE token = $1")
        .bind(token)
        .fetch_optional(&state.db)
        .await?;
    if let Some(invitation) = row {
        return Ok(Found::Db(invitation));
    }

    match state.auth_provider.find_invitation(token).await {
        Ok(Some(legacy)) => Ok(Found::Legacy(legacy)),
        Ok(None) | Err(AuthProviderError::NotConfigured) => {
            Err(AppError::NotFound("Invitation not found".into()))
        }
        Err(e) => Err(e.into()),
    }
}
