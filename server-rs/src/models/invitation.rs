use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::tenant::Role;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "invitation_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    pub fn is_terminal(self) -> bool {
        self != InvitationStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub token: String,
    pub status: InvitationStatus,
    pub invited_by: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Status as observed at `now`: a pending row past its expiry is expired
/// whether or not the sweep has rewritten it yet.
pub fn effective_status(
    status: InvitationStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> InvitationStatus {
    if status == InvitationStatus::Pending && expires_at <= now {
        InvitationStatus::Expired
    } else {
        status
    }
}

impl Invitation {
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        effective_status(self.status, self.expires_at, now)
    }
}

/// Row from the auth provider's own invitation table, read over its REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyInvitation {
    pub id: String,
    pub tenant_id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pending_past_expiry_reads_as_expired() {
        let now = Utc::now();
        assert_eq!(
            effective_status(InvitationStatus::Pending, now - Duration::minutes(1), now),
            InvitationStatus::Expired
        );
        assert_eq!(
            effective_status(InvitationStatus::Pending, now + Duration::days(1), now),
            InvitationStatus::Pending
        );
    }

    #[test]
    fn terminal_statuses_are_kept() {
        let now = Utc::now();
        let past = now - Duration::days(3);
        assert_eq!(
            effective_status(InvitationStatus::Accepted, past, now),
            InvitationStatus::Accepted
        );
        assert_eq!(
            effective_status(InvitationStatus::Cancelled, past, now),
            InvitationStatus::Cancelled
        );
        assert!(InvitationStatus::Expired.is_terminal());
        assert!(!InvitationStatus::Pending.is_terminal());
    }

    #[test]
    fn legacy_rows_deserialize_from_rest_json() {
        let raw = r#"{
            "id": "42",
            "tenant_id": "6f1c2a9e-8d1b-4b59-9a57-1f0f3c1c2b3d",
            "email": "coach@club.test",
            "role": "SCOUT",
            "status": "PENDING",
            "expires_at": "2030-01-01T00:00:00Z",
            "token": "ignored"
        }"#;
        let row: LegacyInvitation = serde_json::from_str(raw).unwrap();
        assert_eq!(row.role, Role::Scout);
        assert_eq!(row.status, InvitationStatus::Pending);
    }
}
