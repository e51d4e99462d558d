use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the placeholder event shown before the server answers.
pub const TRIAL_EVENT_LENGTH_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Trial,
    Meeting,
    Match,
    Training,
    Scouting,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub recurrence: Option<String>,
    pub trial_id: Option<Uuid>,
}

/// Body of a trial create. `player_name` only feeds the optimistic
/// entries and is not sent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDraft {
    pub player_id: Uuid,
    #[serde(skip)]
    pub player_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TrialStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Server answer to a trial create or update.
#[derive(Debug, Clone, Deserialize)]
pub struct TrialWrite {
    pub trial: Trial,
    pub event: Option<CalendarEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTrial {
    pub id: Uuid,
    pub deleted_events: u64,
}

/// `{ "success": bool, "data"?: T, "error"?: string }`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Title the server gives a trial's calendar event.
pub fn trial_event_title(player_name: &str, status: TrialStatus) -> String {
    let base = format!("Trial: {player_name}");
    if status == TrialStatus::Cancelled {
        format!("[Cancelled] {base}")
    } else {
        base
    }
}

pub fn trial_event_end(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::minutes(TRIAL_EVENT_LENGTH_MINUTES)
}
