//! iCalendar (RFC 5545) feed rendering for calendar subscriptions.

use chrono::{DateTime, Duration, Utc};

use crate::models::calendar::CalendarEvent;

const MAX_LINE_OCTETS: usize = 75;
const PRODID: &str = "-//ScoutDesk//Calendar Feed//EN";
const FREQUENCIES: [&str; 7] = [
    "SECONDLY", "MINUTELY", "HOURLY", "DAILY", "WEEKLY", "MONTHLY", "YEARLY",
];

pub fn render_calendar(name: &str, events: &[CalendarEvent], stamp: DateTime<Utc>) -> String {
    let mut out = String::new();
    push_line(&mut out, "BEGIN:VCALENDAR");
    push_line(&mut out, "VERSION:2.0");
    push_line(&mut out, &format!("PRODID:{PRODID}"));
    push_line(&mut out, "CALSCALE:GREGORIAN");
    push_line(&mut out, "METHOD:PUBLISH");
    push_line(&mut out, &format!("X-WR-CALNAME:{}", escape_text(name)));
    for event in events {
        render_event(&mut out, event, stamp);
    }
    push_line(&mut out, "END:VCALENDAR");
    out
}

fn render_event(out: &mut String, event: &CalendarEvent, stamp: DateTime<Utc>) {
    push_line(out, "BEGIN:VEVENT");
    push_line(out, &format!("UID:{}@scoutdesk", event.id));
    push_line(out, &format!("DTSTAMP:{}", format_utc(stamp)));
    if event.all_day {
        let start = event.start_time.date_naive();
        // DTEND is exclusive for all-day events.
        let last = event.end_time.date_naive().max(start);
        let end = last + Duration::days(1);
        push_line(out, &format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")));
        push_line(out, &format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")));
    } else {
        push_line(out, &format!("DTSTART:{}", format_utc(event.start_time)));
        push_line(out, &format!("DTEND:{}", format_utc(event.end_time)));
    }
    push_line(out, &format!("SUMMARY:{}", escape_text(&event.title)));
    if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
        push_line(out, &format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
        push_line(out, &format!("LOCATION:{}", escape_text(location)));
    }
    push_line(out, &format!("CATEGORIES:{}", event.event_type));
    if let Some(Ok(Some(rule))) = event.recurrence.as_deref().map(normalize_rrule) {
        push_line(out, &format!("RRULE:{rule}"));
    }
    push_line(out, &format!("LAST-MODIFIED:{}", format_utc(event.updated_at)));
    push_line(out, "END:VEVENT");
}

fn format_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Appends `line` folded at 75 octets, CRLF terminated.
fn push_line(out: &mut String, line: &str) {
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if used + len > budget {
            out.push_str("\r\n ");
            // The leading space counts toward the next line.
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(c);
        used += len;
    }
    out.push_str("\r\n");
}

/// Accepts `FREQ=...` or `RRULE:FREQ=...`; returns the bare rule, `None`
/// for blank input, or a message when the rule is malformed.
pub fn normalize_rrule(raw: &str) -> Result<Option<String>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let upper = trimmed.to_ascii_uppercase();
    let rule = upper.strip_prefix("RRULE:").unwrap_or(&upper);

    let mut freq = None;
    for part in rule.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(format!("Invalid recurrence part '{part}'"));
        };
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) || value.is_empty() {
            return Err(format!("Invalid recurrence part '{part}'"));
        }
        if key == "FREQ" {
            freq = Some(value);
        }
    }
    match freq {
        Some(f) if FREQUENCIES.contains(&f) => Ok(Some(rule.to_string())),
        Some(f) => Err(format!("Unsupported recurrence frequency '{f}'")),
        None => Err("Recurrence rule needs a FREQ".into()),
    }
}
