use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::AppState;

/// Claims of a Supabase-issued access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub aud: String,
    pub role: Option<String>,
    pub exp: i64,
    pub iat: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

pub fn verify_token(token: &str, config: &AuthConfig) -> AppResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[&config.jwt_audience]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Middleware: requires a valid bearer token. Sets `AuthUser` in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| AppError::Unauthorized("No token provided".into()))?;

    let claims = verify_token(bearer.token(), &state.config.auth)?;
    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

    parts.extensions.insert(AuthUser {
        id,
        email: claims.email,
    });
    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config() -> AuthConfig {
        AuthConfig {
            provider_url: "http://localhost:54321".into(),
            service_role_key: String::new(),
            anon_key: String::new(),
            jwt_secret: "test-secret".into(),
            jwt_audience: "authenticated".into(),
            invitation_table: "team_invitations".into(),
            request_timeout_secs: 10,
        }
    }

    fn token(aud: &str, secret: &str, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: Some("scout@club.test".into()),
            aud: aud.into(),
            role: Some("authenticated".into()),
            exp: now + exp_offset,
            iat: Some(now),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_provider_token() {
        let claims = verify_token(&token("authenticated", "test-secret", 600), &config()).unwrap();
        assert_eq!(claims.email.as_deref(), Some("scout@club.test"));
    }

    #[test]
    fn rejects_wrong_audience_secret_or_expired() {
        assert!(verify_token(&token("anon", "test-secret", 600), &config()).is_err());
        assert!(verify_token(&token("authenticated", "other", 600), &config()).is_err());
        assert!(verify_token(&token("authenticated", "test-secret", -3600), &config()).is_err());
    }
}
