//! Keeps each trial's TRIAL calendar event in step with the trial row.
//!
//! Every function takes the caller's transaction so the trial write and
//! the event write commit or roll back together.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::calendar::{CalendarEvent, EventType};
use crate::models::trial::{Trial, TrialStatus};

const CANCELLED_PREFIX: &str = "[Cancelled] ";

pub fn event_title(player_name: &str, status: TrialStatus) -> String {
    let title = format!("Trial: {player_name}");
    if status == TrialStatus::Cancelled {
        format!("{CANCELLED_PREFIX}{title}")
    } else {
        title
    }
}

/// New trial events last one hour.
pub fn event_window(scheduled_at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (scheduled_at, scheduled_at + Duration::hours(1))
}

pub async fn create_event(
    conn: &mut PgConnection,
    trial: &Trial,
    player_name: &str,
    created_by: Uuid,
) -> Result<CalendarEvent, sqlx::Error> {
    let (start, end) = event_window(trial.scheduled_at);
    sqlx::query_as::<_, CalendarEvent>(
        r#"INSERT INTO calendar_events
            (tenant_id, title, event_type, start_time, end_time, all_day, location, trial_id, created_by)
        VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8)
        RETURNING *"#,
    )
    .bind(trial.tenant_id)
    .bind(event_title(player_name, trial.status))
    .bind(EventType::Trial)
    .bind(start)
    .bind(end)
    .bind(&trial.location)
    .bind(trial.id)
    .bind(created_by)
    .fetch_one(conn)
    .await
}

/// Moves the linked event to the trial's time and location and refreshes
/// its title. The event keeps its own duration. Returns `None` when the
/// event was deleted on its own.
pub async fn sync_event(
    conn: &mut PgConnection,
    trial: &Trial,
    player_name: &str,
) -> Result<Option<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(
        r#"UPDATE calendar_events
        SET title = $1,
            end_time = $2 + (end_time - start_time),
            start_time = $2,
            location = $3,
            updated_at = NOW()
        WHERE trial_id = $4 AND tenant_id = $5
        RETURNING *"#,
    )
    .bind(event_title(player_name, trial.status))
    .bind(trial.scheduled_at)
    .bind(&trial.location)
    .bind(trial.id)
    .bind(trial.tenant_id)
    .fetch_optional(conn)
    .await
}

/// Deletes the event backing `trial_id`; zero or one row.
pub async fn delete_event(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    trial_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM calendar_events WHERE trial_id = $1 AND tenant_id = $2")
        .bind(trial_id)
        .bind(tenant_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
