use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::invitation::LegacyInvitation;

#[derive(Debug, thiserror::Error)]
pub enum AuthProviderError {
    #[error("auth provider is not configured")]
    NotConfigured,
    #[error("email already registered")]
    EmailTaken,
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("auth provider returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("auth provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthProviderError {
    /// Sign-in right after signup can fail until the new identity has
    /// propagated, so credential errors are retried along with outages.
    fn retry_sign_in(&self) -> bool {
        match self {
            Self::InvalidCredentials | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// Thin client for the Supabase-compatible admin, token and REST endpoints.
#[derive(Clone)]
pub struct AuthProviderClient {
    client: Client,
    base_url: String,
    service_role_key: String,
    anon_key: String,
    invitation_table: String,
}

impl AuthProviderClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!("scoutdesk-api/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.provider_url.clone(),
            service_role_key: config.service_role_key.clone(),
            anon_key: config.anon_key.clone(),
            invitation_table: config.invitation_table.clone(),
        })
    }

    fn admin(&self, builder: RequestBuilder) -> Result<RequestBuilder, AuthProviderError> {
        if self.service_role_key.is_empty() {
            return Err(AuthProviderError::NotConfigured);
        }
        Ok(builder
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key))
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<ProviderUser, AuthProviderError> {
        let url = format!("{}/auth/v1/admin/users", self.base_url);
        let body = json!({
            "email": email,
            "password": password,
            "email_confirm": true,
            "user_metadata": { "first_name": first_name, "last_name": last_name },
        });
        let resp = self.admin(self.client.post(&url))?.json(&body).send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let message = error_message(resp).await;
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::CONFLICT {
            if message.to_ascii_lowercase().contains("already") {
                return Err(AuthProviderError::EmailTaken);
            }
        }
        Err(AuthProviderError::Http {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), AuthProviderError> {
        let url = format!("{}/auth/v1/admin/users/{id}", self.base_url);
        let resp = self.admin(self.client.delete(&url))?.send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(AuthProviderError::Http {
            status: resp.status().as_u16(),
            message: error_message(resp).await,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthProviderError> {
        if self.anon_key.is_empty() {
            return Err(AuthProviderError::NotConfigured);
        }
        let url = format!("{}/auth/v1/token", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(AuthProviderError::InvalidCredentials)
            }
            s => Err(AuthProviderError::Http {
                status: s.as_u16(),
                message: error_message(resp).await,
            }),
        }
    }

    /// Up to three sign-in attempts with exponential backoff.
    pub async fn sign_in_with_retry(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthProviderError> {
        (|| async { self.sign_in(email, password).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(300))
                    .with_max_delay(Duration::from_secs(3))
                    .with_max_times(2),
            )
            .when(AuthProviderError::retry_sign_in)
            .notify(|e, dur| {
                tracing::warn!(error = %e, retry_in_ms = dur.as_millis() as u64, "sign-in failed, retrying")
            })
            .await
    }

    /// Looks a token up in the provider-side invitation table.
    pub async fn find_invitation(
        &self,
        token: &str,
    ) -> Result<Option<LegacyInvitation>, AuthProviderError> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.invitation_table);
        let resp = self
            .admin(self.client.get(&url))?
            .query(&[("token", format!("eq.{token}")), ("select", "*".to_string())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AuthProviderError::Http {
                status: resp.status().as_u16(),
                message: error_message(resp).await,
            });
        }
        let rows: Vec<LegacyInvitation> = resp.json().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn mark_invitation_accepted(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuthProviderError> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.invitation_table);
        let resp = self
            .admin(self.client.patch(&url))?
            .query(&[("id", format!("eq.{id}"))])
            .json(&json!({ "status": "ACCEPTED", "accepted_at": at }))
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AuthProviderError::Http {
                status: resp.status().as_u16(),
                message: error_message(resp).await,
            })
        }
    }
}

async fn error_message(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    parse_error_message(&body)
}

/// The provider reports errors under a few different keys depending on
/// the endpoint.
fn parse_error_message(body: &Value) -> String {
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|k| body[*k].as_str())
        .unwrap_or("Unknown auth provider error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_keys() {
        assert_eq!(
            parse_error_message(&json!({"msg": "A user with this email address has already been registered"})),
            "A user with this email address has already been registered"
        );
        assert_eq!(
            parse_error_message(&json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
            "Invalid login credentials"
        );
        assert_eq!(parse_error_message(&Value::Null), "Unknown auth provider error");
    }

    #[test]
    fn only_propagation_and_outages_are_retried() {
        assert!(AuthProviderError::InvalidCredentials.retry_sign_in());
        assert!(AuthProviderError::Http { status: 503, message: String::new() }.retry_sign_in());
        assert!(!AuthProviderError::Http { status: 422, message: String::new() }.retry_sign_in());
        assert!(!AuthProviderError::EmailTaken.retry_sign_in());
        assert!(!AuthProviderError::NotConfigured.retry_sign_in());
    }

    #[test]
    fn session_reads_provider_names_and_writes_camel_case() {
        let session: Session = serde_json::from_value(json!({
            "access_token": "a", "refresh_token": "r", "expires_in": 3600,
            "token_type": "bearer", "user": {"id": "x"}
        }))
        .unwrap();
        let out = serde_json::to_value(&session).unwrap();
        assert_eq!(out["accessToken"], "a");
        assert_eq!(out["expiresIn"], 3600);
    }

    fn config(provider_url: String, service_role_key: &str) -> AuthConfig {
        AuthConfig {
            provider_url,
            service_role_key: service_role_key.into(),
            anon_key: String::new(),
            jwt_secret: "s".into(),
            jwt_audience: "authenticated".into(),
            invitation_table: "team_invitations".into(),
            request_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn admin_calls_need_service_role_key() {
        let client = AuthProviderClient::new(&config("http://127.0.0.1:9".into(), "")).unwrap();
        assert!(matches!(
            client.find_invitation("t").await,
            Err(AuthProviderError::NotConfigured)
        ));
        assert!(matches!(
            client.sign_in("a@b.co", "pw").await,
            Err(AuthProviderError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn hung_provider_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = AuthProviderClient::new(&config(format!("http://{addr}"), "key")).unwrap();
        let started = std::time::Instant::now();
        let err = client.find_invitation("t").await.unwrap_err();
        assert!(matches!(&err, AuthProviderError::Transport(e) if e.is_timeout()), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
