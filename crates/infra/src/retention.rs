//! Retention loop: deletes `SENT` records older than the retention window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use supplyreg_events::{EventStatus, LeaderGate};

use crate::outbox::{OutboxStore, OutboxStoreError};
use crate::scheduler::PeriodicJob;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug)]
pub enum RetentionOutcome {
    Skipped,
    Deleted(u64),
    Failed(OutboxStoreError),
}

pub struct RetentionJob<S, G> {
    store: S,
    leader: G,
    window: Duration,
}

impl<S, G> RetentionJob<S, G>
where
    S: OutboxStore,
    G: LeaderGate,
{
    pub fn new(store: S, leader: G) -> Self {
        Self {
            store,
            leader,
            window: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn tick(&self) -> RetentionOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Delete `SENT` records whose `updated` is strictly before `now - window`.
    /// `PENDING` records are never touched, whatever their age.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> RetentionOutcome {
        if !self.leader.is_leader() {
            debug!("not the leader; skipping retention tick");
            return RetentionOutcome::Skipped;
        }

        let cutoff = now - self.window;
        match self.store.delete_where(EventStatus::Sent, cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, cutoff = %cutoff, "purged sent outbox records");
                }
                RetentionOutcome::Deleted(deleted)
            }
            Err(e) => {
                error!(error = %e, "retention tick failed");
                RetentionOutcome::Failed(e)
            }
        }
    }
}

#[async_trait]
impl<S, G> PeriodicJob for RetentionJob<S, G>
where
    S: OutboxStore + 'static,
    G: LeaderGate + 'static,
{
    fn name(&self) -> &'static str {
        "outbox-retention"
    }

    async fn run_tick(&self) {
        let _ = self.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use supplyreg_core::{AggregateId, UserId};
    use supplyreg_events::{AggregateType, EventRecord, FlagLeaderGate, Metadata};

    use super::*;
    use crate::outbox::InMemoryOutboxStore;

    fn sent_at(updated: DateTime<Utc>) -> EventRecord {
        EventRecord::restore(
            Uuid::now_v7(),
            AggregateId::new(),
            AggregateType::Agreement,
            EventStatus::Sent,
            "signed".to_string(),
            UserId::new(),
            Metadata::new(),
            json!({}),
            updated - Duration::minutes(5),
            updated,
        )
    }

    #[tokio::test]
    async fn deletes_only_records_past_the_window() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let now = Utc::now();
        let old = store.save(sent_at(now - Duration::days(8))).await.unwrap();
        let young = store.save(sent_at(now - Duration::days(6))).await.unwrap();

        let job = RetentionJob::new(store.clone(), FlagLeaderGate::new(true)).with_window(Duration::days(7));
        assert_eq!(job.window(), Duration::days(7));

        match job.tick_at(now).await {
            RetentionOutcome::Deleted(n) => assert_eq!(n, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.get(old.event_id()).is_none());
        assert!(store.get(young.event_id()).is_some());
    }

    #[tokio::test]
    async fn unavailable_store_is_reported_not_raised() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store.set_unavailable(true);

        let job = RetentionJob::new(store.clone(), FlagLeaderGate::new(true));
        assert!(matches!(
            job.tick().await,
            RetentionOutcome::Failed(OutboxStoreError::Storage(_))
        ));
    }
}
