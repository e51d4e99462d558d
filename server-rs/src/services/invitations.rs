use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::invitation::{effective_status, InvitationStatus};

const TOKEN_BYTES: usize = 32;

/// 32 random bytes, base64url without padding (43 characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Why an invitation can no longer be accepted, if it cannot.
pub fn acceptance_error(
    status: InvitationStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<AppError> {
    match effective_status(status, expires_at, now) {
        InvitationStatus::Pending => None,
        InvitationStatus::Accepted => {
            Some(AppError::Gone("Invitation has already been accepted".into()))
        }
        InvitationStatus::Cancelled => Some(AppError::Gone("Invitation was cancelled".into())),
        InvitationStatus::Expired => Some(AppError::Gone("Invitation has expired".into())),
    }
}

/// Marks pending invitations past their expiry as EXPIRED.
pub async fn expire_stale(db: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE invitations SET status = 'EXPIRED' WHERE status = 'PENDING' AND expires_at <= NOW()",
    )
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub fn spawn_expiry_sweep(db: PgPool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match expire_stale(&db).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "expired stale invitations"),
                Err(e) => tracing::warn!(error = %e, "invitation sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn past_due_pending_invitation_is_gone() {
        let now = Utc::now();
        let err = acceptance_error(InvitationStatus::Pending, now - ChronoDuration::seconds(1), now)
            .unwrap();
        assert_eq!(err.status(), StatusCode::GONE);
        assert!(acceptance_error(InvitationStatus::Pending, now + ChronoDuration::hours(1), now)
            .is_none());
    }

    #[test]
    fn terminal_states_are_gone_even_before_expiry() {
        let now = Utc::now();
        let later = now + ChronoDuration::days(3);
        for status in [
            InvitationStatus::Accepted,
            InvitationStatus::Cancelled,
            InvitationStatus::Expired,
        ] {
            let err = acceptance_error(status, later, now).unwrap();
            assert_eq!(err.status(), StatusCode::GONE);
        }
    }
}
