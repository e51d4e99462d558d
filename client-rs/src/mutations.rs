use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::TrialApi;
use crate::cache::{calendar_prefix, dashboard_key, trials_key, QueryCache};
use crate::error::ClientResult;
use crate::types::*;

/// Runs trial writes as snapshot, optimistic patch, request, then
/// reconcile or roll back. The cache lock is never held across the request.
pub struct TrialMutations<A> {
    api: A,
    cache: Arc<Mutex<QueryCache>>,
    tenant: String,
}

impl<A: TrialApi> TrialMutations<A> {
    pub fn new(api: A, cache: Arc<Mutex<QueryCache>>, tenant: &str) -> Self {
        Self {
            api,
            cache,
            tenant: tenant.to_string(),
        }
    }

    pub async fn create(&self, draft: &TrialDraft) -> ClientResult<TrialWrite> {
        let provisional = self
            .cache
            .lock()
            .await
            .optimistic_create_trial(&self.tenant, draft);

        let result = self.api.create_trial(draft).await;
        let mut cache = self.cache.lock().await;
        match &result {
            Ok(write) => cache.confirm_trial(&self.tenant, provisional.trial_id, write),
            Err(e) => {
                tracing::warn!(error = %e, "trial create failed, rolling back");
                cache.rollback(provisional.snapshot);
            }
        }
        self.settle(&mut cache);
        result
    }

    pub async fn update(&self, id: Uuid, patch: &TrialPatch) -> ClientResult<TrialWrite> {
        let snapshot = self
            .cache
            .lock()
            .await
            .optimistic_update_trial(&self.tenant, id, patch);

        let result = self.api.update_trial(id, patch).await;
        let mut cache = self.cache.lock().await;
        match &result {
            Ok(write) => cache.apply_trial_write(&self.tenant, write),
            Err(e) => {
                tracing::warn!(error = %e, trial = %id, "trial update failed, rolling back");
                cache.rollback(snapshot);
            }
        }
        self.settle(&mut cache);
        result
    }

    /// A 404 means the trial is already gone, so the optimistic removal
    /// stands and the error is still returned.
    pub async fn delete(&self, id: Uuid) -> ClientResult<DeletedTrial> {
        let snapshot = self
            .cache
            .lock()
            .await
            .optimistic_delete_trial(&self.tenant, id);

        let result = self.api.delete_trial(id).await;
        let mut cache = self.cache.lock().await;
        if let Err(e) = &result {
            if !e.is_not_found() {
                tracing::warn!(error = %e, trial = %id, "trial delete failed, rolling back");
                cache.rollback(snapshot);
            }
        }
        self.settle(&mut cache);
        result
    }

    fn settle(&self, cache: &mut QueryCache) {
        cache.invalidate(&trials_key(&self.tenant));
        cache.invalidate(&calendar_prefix(&self.tenant));
        cache.invalidate(&dashboard_key(&self.tenant));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::calendar_key;
    use crate::error::ClientError;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use tokio::sync::Notify;

    const TENANT: &str = "fc-test";

    /// Server double: remembers which trials exist and can be told to fail.
    /// A gated double holds every call until the gate is opened.
    #[derive(Default)]
    struct FakeApi {
        existing: std::sync::Mutex<HashSet<Uuid>>,
        fail_with: Option<u16>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeApi {
        fn failing(status: u16) -> Self {
            Self {
                fail_with: Some(status),
                ..Default::default()
            }
        }

        async fn check(&self) -> ClientResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.fail_with {
                Some(status) => Err(ClientError::Http {
                    status,
                    message: "boom".into(),
                }),
                None => Ok(()),
            }
        }
    }

    fn write_for(draft: &TrialDraft, id: Uuid) -> TrialWrite {
        let event_id = Uuid::new_v4();
        TrialWrite {
            trial: Trial {
                id,
                player_id: draft.player_id,
                player_name: draft.player_name.clone(),
                request_id: None,
                request_club: None,
                status: TrialStatus::Scheduled,
                rating: None,
                scheduled_at: draft.scheduled_at,
                location: draft.location.clone(),
                notes: None,
                calendar_event_id: Some(event_id),
            },
            event: Some(CalendarEvent {
                id: event_id,
                title: trial_event_title(&draft.player_name, TrialStatus::Scheduled),
                description: None,
                event_type: EventType::Trial,
                start_time: draft.scheduled_at,
                end_time: trial_event_end(draft.scheduled_at),
                all_day: false,
                location: draft.location.clone(),
                recurrence: None,
                trial_id: Some(id),
            }),
        }
    }

    impl TrialApi for FakeApi {
        async fn create_trial(&self, draft: &TrialDraft) -> ClientResult<TrialWrite> {
            self.check().await?;
            let id = Uuid::new_v4();
            self.existing.lock().unwrap().insert(id);
            Ok(write_for(draft, id))
        }

        async fn update_trial(&self, _id: Uuid, _patch: &TrialPatch) -> ClientResult<TrialWrite> {
            self.check().await?;
            Err(ClientError::Decode("not used".into()))
        }

        async fn delete_trial(&self, id: Uuid) -> ClientResult<DeletedTrial> {
            self.check().await?;
            if self.existing.lock().unwrap().remove(&id) {
                Ok(DeletedTrial { id, deleted_events: 1 })
            } else {
                Err(ClientError::Http {
                    status: 404,
                    message: "Trial not found".into(),
                })
            }
        }
    }

    fn draft() -> TrialDraft {
        TrialDraft {
            player_id: Uuid::new_v4(),
            player_name: "Jan Novak".into(),
            request_id: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
            location: None,
            notes: None,
        }
    }

    fn month() -> Vec<String> {
        calendar_key(TENANT, "2025-05-01", "2025-06-01")
    }

    fn seeded() -> Arc<Mutex<QueryCache>> {
        let mut cache = QueryCache::new();
        cache.set_trials(trials_key(TENANT), vec![]);
        cache.set_events(month(), vec![]);
        Arc::new(Mutex::new(cache))
    }

    #[tokio::test]
    async fn create_confirms_server_ids() {
        let cache = seeded();
        let m = TrialMutations::new(FakeApi::default(), cache.clone(), TENANT);
        let write = m.create(&draft()).await.unwrap();

        let guard = cache.lock().await;
        let trials = guard.trials(&trials_key(TENANT)).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].id, write.trial.id);
        let events = guard.events(&month()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(Some(events[0].id), write.trial.calendar_event_id);
        assert!(guard.is_stale(&month()));
    }

    #[tokio::test]
    async fn failed_create_rolls_back() {
        let cache = seeded();
        let m = TrialMutations::new(FakeApi::failing(500), cache.clone(), TENANT);
        assert!(m.create(&draft()).await.is_err());

        let guard = cache.lock().await;
        assert!(guard.trials(&trials_key(TENANT)).unwrap().is_empty());
        assert!(guard.events(&month()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_delete_surfaces_404_and_keeps_cache() {
        let cache = seeded();
        let m = TrialMutations::new(FakeApi::default(), cache.clone(), TENANT);
        let write = m.create(&draft()).await.unwrap();

        let first = m.delete(write.trial.id).await.unwrap();
        assert_eq!(first.deleted_events, 1);
        let err = m.delete(write.trial.id).await.unwrap_err();
        assert!(err.is_not_found());

        let guard = cache.lock().await;
        assert!(guard.trials(&trials_key(TENANT)).unwrap().is_empty());
        assert!(guard.events(&month()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_restores_trial_and_event() {
        let cache = seeded();
        let ok_api = TrialMutations::new(FakeApi::default(), cache.clone(), TENANT);
        let write = ok_api.create(&draft()).await.unwrap();

        let failing = TrialMutations::new(FakeApi::failing(503), cache.clone(), TENANT);
        assert!(failing.delete(write.trial.id).await.is_err());

        let guard = cache.lock().await;
        assert_eq!(guard.trials(&trials_key(TENANT)).unwrap().len(), 1);
        assert_eq!(guard.events(&month()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_update_restores_schedule() {
        let cache = seeded();
        let m = TrialMutations::new(FakeApi::default(), cache.clone(), TENANT);
        let write = m.create(&draft()).await.unwrap();
        let original = write.trial.scheduled_at;

        let failing = TrialMutations::new(FakeApi::failing(500), cache.clone(), TENANT);
        let patch = TrialPatch {
            scheduled_at: Some(Utc.with_ymd_and_hms(2025, 5, 9, 9, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(failing.update(write.trial.id, &patch).await.is_err());

        let guard = cache.lock().await;
        assert_eq!(guard.trials(&trials_key(TENANT)).unwrap()[0].scheduled_at, original);
        assert_eq!(guard.events(&month()).unwrap()[0].start_time, original);
    }

    #[tokio::test]
    async fn failed_create_spares_a_create_that_finished_meanwhile() {
        let cache = seeded();
        let gate = Arc::new(Notify::new());
        let slow = TrialMutations::new(
            FakeApi {
                fail_with: Some(500),
                gate: Some(gate.clone()),
                ..Default::default()
            },
            cache.clone(),
            TENANT,
        );
        let fast = TrialMutations::new(FakeApi::default(), cache.clone(), TENANT);

        let slow_draft = draft();
        let (failed, write) = tokio::join!(slow.create(&slow_draft), async {
            let write = fast.create(&draft()).await.unwrap();
            gate.notify_one();
            write
        });
        assert!(failed.is_err());

        let guard = cache.lock().await;
        let trials = guard.trials(&trials_key(TENANT)).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].id, write.trial.id);
        let events = guard.events(&month()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(Some(events[0].id), write.trial.calendar_event_id);
    }
}
