use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::deserialize_some;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "trial_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TrialStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Trial {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub player_id: Uuid,
    pub request_id: Option<Uuid>,
    pub status: TrialStatus,
    pub rating: Option<i16>,
    pub scheduled_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trial joined with the player's name, the request's club and the
/// calendar event backing it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrialView {
    pub id: Uuid,
    pub player_id: Uuid,
    pub player_name: String,
    pub request_id: Option<Uuid>,
    pub request_club: Option<String>,
    pub status: TrialStatus,
    pub rating: Option<i16>,
    pub scheduled_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub calendar_event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrialBody {
    pub player_id: Uuid,
    pub request_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub status: Option<TrialStatus>,
    pub rating: Option<i16>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrialBody {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub request_id: Option<Option<Uuid>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<TrialStatus>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub rating: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialQuery {
    pub player_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub status: Option<TrialStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub fn valid_trial_rating(rating: Option<i16>) -> bool {
    rating.map_or(true, |r| (1..=10).contains(&r))
}
