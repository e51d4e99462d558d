use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

/// Middleware: only platform super admins pass. Must run inside
/// `authenticate`.
pub async fn require_super_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    let is_super_admin: bool =
        sqlx::query_scalar("SELECT is_super_admin FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?
            .unwrap_or(false);

    if !is_super_admin {
        return Err(AppError::Forbidden("Requires super admin".into()));
    }
    Ok(next.run(req).await)
}
