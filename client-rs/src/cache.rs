use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use crate::types::*;

pub type QueryKey = Vec<String>;

pub fn trials_key(tenant: &str) -> QueryKey {
    vec!["trials".into(), tenant.into()]
}

/// `start` and `end` are RFC 3339 instants or `YYYY-MM-DD` dates (UTC).
pub fn calendar_key(tenant: &str, start: &str, end: &str) -> QueryKey {
    vec!["calendar".into(), tenant.into(), start.into(), end.into()]
}

pub fn calendar_prefix(tenant: &str) -> QueryKey {
    vec!["calendar".into(), tenant.into()]
}

pub fn dashboard_key(tenant: &str) -> QueryKey {
    vec!["dashboard".into(), tenant.into()]
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Trials(Vec<Trial>),
    Events(Vec<CalendarEvent>),
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    data: QueryData,
    stale: bool,
}

/// One record a mutation changed in one query, with what it was before.
/// `None` means the record did not exist there.
#[derive(Debug, Clone)]
enum Change {
    Trial {
        key: QueryKey,
        id: Uuid,
        before: Option<Trial>,
    },
    Event {
        key: QueryKey,
        id: Uuid,
        before: Option<CalendarEvent>,
    },
}

/// Undo log of an optimistic write. Rolling back only reverts the records
/// the write touched, so results other mutations confirmed meanwhile stay.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    changes: Vec<Change>,
}

impl Snapshot {
    /// Number of per-query record changes recorded.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Result of an optimistic create: the ids standing in for the server's.
#[derive(Debug, Clone)]
pub struct Provisional {
    pub trial_id: Uuid,
    pub event_id: Uuid,
    pub snapshot: Snapshot,
}

/// Client-side query results keyed by query key, patched ahead of the
/// server during trial mutations.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, Entry>,
}

fn has_prefix(key: &QueryKey, prefix: &[String]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()] == *prefix
}

fn parse_bound(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?))
}

/// Whether an event shows up in the calendar query `key`, using the
/// server's rule: it ends at or after the window start and starts before
/// the window end. Keys without a readable window take every event.
fn window_admits(key: &QueryKey, event: &CalendarEvent) -> bool {
    let [_, _, start, end] = key.as_slice() else {
        return true;
    };
    match (parse_bound(start), parse_bound(end)) {
        (Some(start), Some(end)) => event.end_time >= start && event.start_time < end,
        _ => true,
    }
}

fn upsert<T: Clone>(list: &mut Vec<T>, record: T, same: impl Fn(&T) -> bool) {
    match list.iter_mut().find(|r| same(r)) {
        Some(slot) => *slot = record,
        None => list.push(record),
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trials(&mut self, key: QueryKey, trials: Vec<Trial>) {
        self.entries.insert(
            key,
            Entry {
                data: QueryData::Trials(trials),
                stale: false,
            },
        );
    }

    pub fn set_events(&mut self, key: QueryKey, events: Vec<CalendarEvent>) {
        self.entries.insert(
            key,
            Entry {
                data: QueryData::Events(events),
                stale: false,
            },
        );
    }

    pub fn trials(&self, key: &QueryKey) -> Option<&[Trial]> {
        match self.entries.get(key).map(|e| &e.data) {
            Some(QueryData::Trials(t)) => Some(t),
            _ => None,
        }
    }

    pub fn events(&self, key: &QueryKey) -> Option<&[CalendarEvent]> {
        match self.entries.get(key).map(|e| &e.data) {
            Some(QueryData::Events(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.stale)
    }

    /// Marks every query under `prefix` stale; returns how many.
    pub fn invalidate(&mut self, prefix: &[String]) -> usize {
        let mut marked = 0;
        for (key, entry) in self.entries.iter_mut() {
            if has_prefix(key, prefix) {
                entry.stale = true;
                marked += 1;
            }
        }
        marked
    }

    /// Reverts the records the snapshot's mutation changed, newest first.
    /// Queries dropped since then are skipped.
    pub fn rollback(&mut self, snapshot: Snapshot) {
        for change in snapshot.changes.into_iter().rev() {
            match change {
                Change::Trial { key, id, before } => {
                    let Some(QueryData::Trials(list)) =
                        self.entries.get_mut(&key).map(|e| &mut e.data)
                    else {
                        continue;
                    };
                    match before {
                        Some(trial) => {
                            upsert(list, trial, |t| t.id == id);
                            list.sort_by_key(|t| t.scheduled_at);
                        }
                        None => list.retain(|t| t.id != id),
                    }
                }
                Change::Event { key, id, before } => {
                    let Some(QueryData::Events(list)) =
                        self.entries.get_mut(&key).map(|e| &mut e.data)
                    else {
                        continue;
                    };
                    match before {
                        Some(event) => {
                            upsert(list, event, |e| e.id == id);
                            list.sort_by_key(|e| e.start_time);
                        }
                        None => list.retain(|e| e.id != id),
                    }
                }
            }
        }
    }

    fn trial_lists<'a>(
        &'a mut self,
        tenant: &str,
    ) -> impl Iterator<Item = (&'a QueryKey, &'a mut Vec<Trial>)> {
        let prefix = trials_key(tenant);
        self.entries
            .iter_mut()
            .filter(move |(key, _)| has_prefix(key, &prefix))
            .filter_map(|(key, entry)| match &mut entry.data {
                QueryData::Trials(t) => Some((key, t)),
                QueryData::Events(_) => None,
            })
    }

    fn event_lists<'a>(
        &'a mut self,
        tenant: &str,
    ) -> impl Iterator<Item = (&'a QueryKey, &'a mut Vec<CalendarEvent>)> {
        let prefix = calendar_prefix(tenant);
        self.entries
            .iter_mut()
            .filter(move |(key, _)| has_prefix(key, &prefix))
            .filter_map(|(key, entry)| match &mut entry.data {
                QueryData::Events(e) => Some((key, e)),
                QueryData::Trials(_) => None,
            })
    }

    /// Inserts a provisional trial into every trial query of the tenant and
    /// a one-hour TRIAL placeholder event into each calendar query whose
    /// window it falls in.
    pub fn optimistic_create_trial(&mut self, tenant: &str, draft: &TrialDraft) -> Provisional {
        let mut changes = Vec::new();
        let trial_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();

        let trial = Trial {
            id: trial_id,
            player_id: draft.player_id,
            player_name: draft.player_name.clone(),
            request_id: draft.request_id,
            request_club: None,
            status: TrialStatus::Scheduled,
            rating: None,
            scheduled_at: draft.scheduled_at,
            location: draft.location.clone(),
            notes: draft.notes.clone(),
            calendar_event_id: Some(event_id),
        };
        let event = CalendarEvent {
            id: event_id,
            title: trial_event_title(&draft.player_name, TrialStatus::Scheduled),
            description: None,
            event_type: EventType::Trial,
            start_time: draft.scheduled_at,
            end_time: trial_event_end(draft.scheduled_at),
            all_day: false,
            location: draft.location.clone(),
            recurrence: None,
            trial_id: Some(trial_id),
        };

        for (key, list) in self.trial_lists(tenant) {
            list.push(trial.clone());
            list.sort_by_key(|t| t.scheduled_at);
            changes.push(Change::Trial {
                key: key.clone(),
                id: trial_id,
                before: None,
            });
        }
        for (key, list) in self.event_lists(tenant) {
            if !window_admits(key, &event) {
                continue;
            }
            list.push(event.clone());
            list.sort_by_key(|e| e.start_time);
            changes.push(Change::Event {
                key: key.clone(),
                id: event_id,
                before: None,
            });
        }

        Provisional {
            trial_id,
            event_id,
            snapshot: Snapshot { changes },
        }
    }

    /// Swaps the provisional trial and its placeholder for the server's
    /// records.
    pub fn confirm_trial(&mut self, tenant: &str, provisional_id: Uuid, write: &TrialWrite) {
        for (_, list) in self.trial_lists(tenant) {
            for t in list.iter_mut().filter(|t| t.id == provisional_id) {
                *t = write.trial.clone();
            }
        }
        for (_, list) in self.event_lists(tenant) {
            match &write.event {
                Some(event) => {
                    for e in list.iter_mut().filter(|e| e.trial_id == Some(provisional_id)) {
                        *e = event.clone();
                    }
                }
                None => list.retain(|e| e.trial_id != Some(provisional_id)),
            }
        }
    }

    /// Patches the cached trial and moves its linked event along.
    pub fn optimistic_update_trial(&mut self, tenant: &str, id: Uuid, patch: &TrialPatch) -> Snapshot {
        let mut changes = Vec::new();
        let mut player_name = None;
        let mut status = None;

        for (key, list) in self.trial_lists(tenant) {
            for t in list.iter_mut().filter(|t| t.id == id) {
                changes.push(Change::Trial {
                    key: key.clone(),
                    id,
                    before: Some(t.clone()),
                });
                if let Some(at) = patch.scheduled_at {
                    t.scheduled_at = at;
                }
                if let Some(s) = patch.status {
                    t.status = s;
                }
                if let Some(r) = patch.rating {
                    t.rating = Some(r);
                }
                if let Some(loc) = &patch.location {
                    t.location = Some(loc.clone());
                }
                if let Some(n) = &patch.notes {
                    t.notes = Some(n.clone());
                }
                player_name = Some(t.player_name.clone());
                status = Some(t.status);
            }
        }

        for (key, list) in self.event_lists(tenant) {
            for e in list.iter_mut().filter(|e| e.trial_id == Some(id)) {
                changes.push(Change::Event {
                    key: key.clone(),
                    id: e.id,
                    before: Some(e.clone()),
                });
                if let Some(at) = patch.scheduled_at {
                    let length = e.end_time - e.start_time;
                    e.start_time = at;
                    e.end_time = at + length;
                }
                if let Some(loc) = &patch.location {
                    e.location = Some(loc.clone());
                }
                if let (Some(name), Some(status)) = (&player_name, status) {
                    e.title = trial_event_title(name, status);
                }
            }
        }
        Snapshot { changes }
    }

    /// Replaces cached copies of the trial and its event with the server's.
    pub fn apply_trial_write(&mut self, tenant: &str, write: &TrialWrite) {
        let id = write.trial.id;
        for (_, list) in self.trial_lists(tenant) {
            for t in list.iter_mut().filter(|t| t.id == id) {
                *t = write.trial.clone();
            }
        }
        if let Some(event) = &write.event {
            for (_, list) in self.event_lists(tenant) {
                for e in list.iter_mut().filter(|e| e.id == event.id) {
                    *e = event.clone();
                }
            }
        }
    }

    /// Drops the trial and at most one linked event per calendar query.
    /// Unknown ids leave the cache untouched.
    pub fn optimistic_delete_trial(&mut self, tenant: &str, id: Uuid) -> Snapshot {
        let mut changes = Vec::new();
        for (key, list) in self.trial_lists(tenant) {
            if let Some(pos) = list.iter().position(|t| t.id == id) {
                changes.push(Change::Trial {
                    key: key.clone(),
                    id,
                    before: Some(list.remove(pos)),
                });
            }
        }
        for (key, list) in self.event_lists(tenant) {
            if let Some(pos) = list.iter().position(|e| e.trial_id == Some(id)) {
                let event = list.remove(pos);
                changes.push(Change::Event {
                    key: key.clone(),
                    id: event.id,
                    before: Some(event),
                });
            }
        }
        Snapshot { changes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    const TENANT: &str = "fc-test";

    fn draft() -> TrialDraft {
        TrialDraft {
            player_id: Uuid::new_v4(),
            player_name: "Jan Novak".into(),
            request_id: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
            location: Some("Training ground".into()),
            notes: None,
        }
    }

    fn seeded() -> QueryCache {
        let mut cache = QueryCache::new();
        cache.set_trials(trials_key(TENANT), vec![]);
        cache.set_events(calendar_key(TENANT, "2025-05-01", "2025-06-01"), vec![]);
        cache.set_events(calendar_key(TENANT, "2025-04-28", "2025-05-05"), vec![]);
        cache.set_events(calendar_key("other", "2025-05-01", "2025-06-01"), vec![]);
        cache
    }

    fn month() -> QueryKey {
        calendar_key(TENANT, "2025-05-01", "2025-06-01")
    }

    #[test]
    fn create_adds_trial_and_one_hour_placeholder() {
        let mut cache = seeded();
        let p = cache.optimistic_create_trial(TENANT, &draft());

        let trials = cache.trials(&trials_key(TENANT)).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].calendar_event_id, Some(p.event_id));

        for key in [month(), calendar_key(TENANT, "2025-04-28", "2025-05-05")] {
            let events = cache.events(&key).unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, EventType::Trial);
            assert_eq!(events[0].title, "Trial: Jan Novak");
            assert_eq!(events[0].end_time - events[0].start_time, Duration::hours(1));
            assert_eq!(events[0].trial_id, Some(p.trial_id));
        }
        let other = calendar_key("other", "2025-05-01", "2025-06-01");
        assert!(cache.events(&other).unwrap().is_empty());
        assert_eq!(p.snapshot.len(), 3);
    }

    #[test]
    fn placeholder_only_lands_in_matching_windows() {
        let mut cache = seeded();
        let june = calendar_key(TENANT, "2025-06-01", "2025-07-01");
        let instant_window = calendar_key(TENANT, "2025-05-02T08:00:00Z", "2025-05-02T09:30:00+00:00");
        cache.set_events(june.clone(), vec![]);
        cache.set_events(instant_window.clone(), vec![]);

        let p = cache.optimistic_create_trial(TENANT, &draft());
        assert!(cache.events(&june).unwrap().is_empty());
        assert_eq!(cache.events(&instant_window).unwrap().len(), 1);
        assert_eq!(cache.events(&month()).unwrap().len(), 1);
        // Trial list plus three admitting calendar queries.
        assert_eq!(p.snapshot.len(), 4);
    }

    #[test]
    fn rollback_keeps_records_confirmed_meanwhile() {
        let mut cache = seeded();
        let failing = cache.optimistic_create_trial(TENANT, &draft());
        let confirmed = cache.optimistic_create_trial(TENANT, &draft());

        let mut trial = cache
            .trials(&trials_key(TENANT))
            .unwrap()
            .iter()
            .find(|t| t.id == confirmed.trial_id)
            .unwrap()
            .clone();
        trial.id = Uuid::new_v4();
        cache.confirm_trial(
            TENANT,
            confirmed.trial_id,
            &TrialWrite {
                trial: trial.clone(),
                event: None,
            },
        );

        cache.rollback(failing.snapshot);
        let trials = cache.trials(&trials_key(TENANT)).unwrap();
        assert_eq!(trials, [trial].as_slice());
        assert!(cache.events(&month()).unwrap().is_empty());
    }

    #[test]
    fn rollback_of_delete_restores_the_removed_records() {
        let mut cache = seeded();
        let p = cache.optimistic_create_trial(TENANT, &draft());
        let before = cache.events(&month()).unwrap().to_vec();

        let snapshot = cache.optimistic_delete_trial(TENANT, p.trial_id);
        assert!(cache.events(&month()).unwrap().is_empty());
        cache.rollback(snapshot);
        assert_eq!(cache.events(&month()).unwrap(), before.as_slice());
        assert_eq!(cache.trials(&trials_key(TENANT)).unwrap()[0].id, p.trial_id);
    }

    #[test]
    fn confirm_swaps_in_server_records() {
        let mut cache = seeded();
        let d = draft();
        let p = cache.optimistic_create_trial(TENANT, &d);

        let real_id = Uuid::new_v4();
        let real_event = Uuid::new_v4();
        let mut trial = cache.trials(&trials_key(TENANT)).unwrap()[0].clone();
        trial.id = real_id;
        trial.calendar_event_id = Some(real_event);
        let mut event = cache.events(&month()).unwrap()[0].clone();
        event.id = real_event;
        event.trial_id = Some(real_id);

        cache.confirm_trial(
            TENANT,
            p.trial_id,
            &TrialWrite {
                trial,
                event: Some(event),
            },
        );
        assert_eq!(cache.trials(&trials_key(TENANT)).unwrap()[0].id, real_id);
        let events = cache.events(&month()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, real_event);
    }

    #[test]
    fn rollback_restores_captured_entries() {
        let mut cache = seeded();
        let before = cache.events(&month()).unwrap().to_vec();
        let p = cache.optimistic_create_trial(TENANT, &draft());
        cache.rollback(p.snapshot);
        assert!(cache.trials(&trials_key(TENANT)).unwrap().is_empty());
        assert_eq!(cache.events(&month()).unwrap(), before.as_slice());
    }

    #[test]
    fn update_moves_event_and_marks_cancelled() {
        let mut cache = seeded();
        let p = cache.optimistic_create_trial(TENANT, &draft());
        let later = Utc.with_ymd_and_hms(2025, 5, 3, 14, 0, 0).unwrap();

        cache.optimistic_update_trial(
            TENANT,
            p.trial_id,
            &TrialPatch {
                scheduled_at: Some(later),
                status: Some(TrialStatus::Cancelled),
                location: Some("Stadium".into()),
                ..Default::default()
            },
        );

        let trial = &cache.trials(&trials_key(TENANT)).unwrap()[0];
        assert_eq!(trial.scheduled_at, later);
        let event = &cache.events(&month()).unwrap()[0];
        assert_eq!(event.start_time, later);
        assert_eq!(event.end_time, later + Duration::hours(1));
        assert_eq!(event.location.as_deref(), Some("Stadium"));
        assert_eq!(event.title, "[Cancelled] Trial: Jan Novak");
    }

    #[test]
    fn delete_removes_at_most_one_linked_event() {
        let mut cache = seeded();
        let p = cache.optimistic_create_trial(TENANT, &draft());
        let mut dup = cache.events(&month()).unwrap()[0].clone();
        dup.id = Uuid::new_v4();
        let mut events = cache.events(&month()).unwrap().to_vec();
        events.push(dup);
        cache.set_events(month(), events);

        cache.optimistic_delete_trial(TENANT, p.trial_id);
        assert!(cache.trials(&trials_key(TENANT)).unwrap().is_empty());
        assert_eq!(cache.events(&month()).unwrap().len(), 1);
    }

    #[test]
    fn second_delete_leaves_cache_alone() {
        let mut cache = seeded();
        let p = cache.optimistic_create_trial(TENANT, &draft());
        cache.optimistic_delete_trial(TENANT, p.trial_id);
        let trials = cache.trials(&trials_key(TENANT)).unwrap().to_vec();
        let events = cache.events(&month()).unwrap().to_vec();

        cache.optimistic_delete_trial(TENANT, p.trial_id);
        assert_eq!(cache.trials(&trials_key(TENANT)).unwrap(), trials.as_slice());
        assert_eq!(cache.events(&month()).unwrap(), events.as_slice());
        assert!(events.is_empty());
    }

    #[test]
    fn invalidate_marks_prefix_stale() {
        let mut cache = seeded();
        assert_eq!(cache.invalidate(&calendar_prefix(TENANT)), 2);
        assert!(cache.is_stale(&month()));
        assert!(!cache.is_stale(&trials_key(TENANT)));
        assert!(!cache.is_stale(&calendar_key("other", "2025-05-01", "2025-06-01")));
    }
}
