//! Read-only view over the running pipeline: monitoring state and stored statistics.

use crate::error::{PhoneShamerError, Result};
use crate::state::{MonitoringState, SharedState, StateSnapshot};
use crate::storage::{EventStore, StatsRange, UsageEvent, UsageStats};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// Cheap to clone; hand one to every reader. There is no way to change state through it.
#[derive(Clone)]
pub struct QueryHandle {
    state: Arc<SharedState>,
    store: Arc<dyn EventStore>,
    tz: Tz,
}

impl QueryHandle {
    pub fn new(state: Arc<SharedState>, store: Arc<dyn EventStore>, tz: Tz) -> Self {
        Self { state, store, tz }
    }

    pub fn monitoring_state(&self) -> MonitoringState {
        self.state.monitoring()
    }

    /// Monitoring, cooldown and commit-in-flight as one consistent read
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Aggregates for the `days` days ending today
    pub async fn stats(&self, days: u32) -> Result<UsageStats> {
        self.stats_for(StatsRange::ending_today(days, self.tz)).await
    }

    pub async fn stats_for(&self, range: StatsRange) -> Result<UsageStats> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.query_aggregates(&range))
            .await
            .map_err(|e| PhoneShamerError::component("query", e.to_string()))?
            .map_err(Into::into)
    }

    pub async fn recent_events(&self, limit: usize) -> Result<Vec<UsageEvent>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.recent_events(limit))
            .await
            .map_err(|e| PhoneShamerError::component("query", e.to_string()))?
            .map_err(Into::into)
    }

    /// Events confirmed in `[start, end)`, oldest first
    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.events_in_range(start, end))
            .await
            .map_err(|e| PhoneShamerError::component("query", e.to_string()))?
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use crate::storage::SqliteEventStore;
    use chrono::Duration as ChronoDuration;
    use std::time::{Duration, SystemTime};
    use uuid::Uuid;

    fn event(minutes_ago: i64) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            confirmed_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
            person: BoundingBox::new(0.0, 0.0, 100.0, 200.0),
            phone: BoundingBox::new(40.0, 60.0, 20.0, 30.0),
            overlap_ratio: 1.0,
            frame_count: 5,
            screenshot: format!("shots/{}.jpg", minutes_ago),
        }
    }

    fn handle() -> (QueryHandle, Arc<SharedState>, Arc<SqliteEventStore>) {
        let state = Arc::new(SharedState::new(
            MonitoringState::Active,
            Duration::from_secs(10),
        ));
        let store = Arc::new(SqliteEventStore::open_in_memory().unwrap());
        let query = QueryHandle::new(Arc::clone(&state), store.clone(), Tz::UTC);
        (query, state, store)
    }

    #[tokio::test]
    async fn test_recent_events_newest_first() {
        let (query, _state, store) = handle();
        store.append(&event(30)).unwrap();
        store.append(&event(1)).unwrap();
        store.append(&event(10)).unwrap();

        let recent = query.recent_events(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].confirmed_at > recent[1].confirmed_at);
        assert_eq!(recent[0].screenshot, "shots/1.jpg");
    }

    #[tokio::test]
    async fn test_events_between_is_half_open_and_oldest_first() {
        let (query, _state, store) = handle();
        let old = event(120);
        let inside_late = event(5);
        let inside_early = event(50);
        for e in [&old, &inside_late, &inside_early] {
            store.append(e).unwrap();
        }

        let events = query
            .events_between(Utc::now() - ChronoDuration::minutes(60), inside_late.confirmed_at)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, inside_early.id);

        let all = query
            .events_between(old.confirmed_at, Utc::now())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![old.id, inside_early.id, inside_late.id]);
    }

    #[tokio::test]
    async fn test_stats_reflect_store() {
        let (query, _state, store) = handle();
        store.append(&event(0)).unwrap();

        let stats = query.stats(7).await.unwrap();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.week_events, 1);
        assert_eq!(stats.daily.len(), 7);
    }

    #[test]
    fn test_snapshot_sees_committed_cooldown() {
        let (query, state, _store) = handle();
        assert!(query.snapshot().cooldown.last_event.is_none());

        let at = SystemTime::now();
        state.try_reserve_commit(at).unwrap().complete();

        let snapshot = query.snapshot();
        assert_eq!(snapshot.cooldown.last_event, Some(at));
        assert!(!snapshot.commit_in_flight);
        assert_eq!(query.monitoring_state(), MonitoringState::Active);
    }
}
