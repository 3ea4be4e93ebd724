use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use supplyreg_events::{EventRecord, EventStatus};

/// Outbox persistence errors.
///
/// Only `Storage` means the backing store is unavailable; the other variants
/// describe a single record and never abort a dispatch pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxStoreError {
    #[error("outbox record {0} not found")]
    NotFound(Uuid),

    #[error("illegal status transition for {event_id}: {from} -> {to}")]
    IllegalTransition {
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
    },

    #[error("duplicate outbox record {0}")]
    Duplicate(Uuid),

    #[error("corrupt outbox row: {0}")]
    Corrupt(String),

    #[error("outbox storage error: {0}")]
    Storage(String),
}

impl OutboxStoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, OutboxStoreError::Storage(_))
    }
}

/// Backlog snapshot reported by the ops endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutboxStats {
    pub pending: u64,
    pub sent: u64,
    pub oldest_pending_created: Option<DateTime<Utc>>,
}

impl OutboxStats {
    /// Age of the oldest pending record at `now`, in whole seconds.
    pub fn oldest_pending_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.oldest_pending_created
            .map(|created| (now - created).num_seconds().max(0))
    }
}

/// Delivery bookkeeping for a record that failed at least once.
///
/// Kept apart from [`EventRecord`] so records stay immutable apart from
/// `status` and `updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    pub event_id: Uuid,
    pub attempts: u32,
    pub last_error: String,
    pub next_attempt_at: DateTime<Utc>,
    pub parked: bool,
}

impl DeliveryState {
    /// Whether dispatch may try this record at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.parked && self.next_attempt_at <= now
    }
}

/// Durable outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new record outside any caller transaction.
    async fn save(&self, record: EventRecord) -> Result<EventRecord, OutboxStoreError>;

    /// All records with the given status, oldest `created` first.
    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>, OutboxStoreError>;

    /// Move a record to `status`, stamping `updated`. Only `PENDING -> SENT` is legal.
    async fn update_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError>;

    /// Delete records with `status` whose `updated` is strictly before `updated_before`.
    async fn delete_where(
        &self,
        status: EventStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<u64, OutboxStoreError>;

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError>;
}

/// Write side of the outbox bound to the caller's open transaction.
///
/// Whatever implements this must make the insert visible exactly when the
/// surrounding business write commits.
#[async_trait]
pub trait OutboxWriter: Send {
    async fn insert(&mut self, record: EventRecord) -> Result<EventRecord, OutboxStoreError>;
}

/// Per-record retry bookkeeping.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn delivery_states(&self) -> Result<HashMap<Uuid, DeliveryState>, OutboxStoreError>;

    async fn save_delivery_state(&self, state: DeliveryState) -> Result<(), OutboxStoreError>;

    async fn clear_delivery_state(&self, event_id: Uuid) -> Result<(), OutboxStoreError>;

    async fn parked(&self) -> Result<Vec<DeliveryState>, OutboxStoreError>;

    /// Make a parked record eligible again. Returns `false` if it was not parked.
    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxStoreError>;
}

/// A store that also keeps delivery bookkeeping. Both shipped stores are one.
pub trait OutboxBackend: OutboxStore + DeliveryLog {}

impl<T> OutboxBackend for T where T: OutboxStore + DeliveryLog + ?Sized {}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn save(&self, record: EventRecord) -> Result<EventRecord, OutboxStoreError> {
        (**self).save(record).await
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>, OutboxStoreError> {
        (**self).find_by_status(status).await
    }

    async fn update_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        (**self).update_status(event_id, status, updated).await
    }

    async fn delete_where(
        &self,
        status: EventStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<u64, OutboxStoreError> {
        (**self).delete_where(status, updated_before).await
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        (**self).stats().await
    }
}

#[async_trait]
impl<S> DeliveryLog for Arc<S>
where
    S: DeliveryLog + ?Sized,
{
    async fn delivery_states(&self) -> Result<HashMap<Uuid, DeliveryState>, OutboxStoreError> {
        (**self).delivery_states().await
    }

    async fn save_delivery_state(&self, state: DeliveryState) -> Result<(), OutboxStoreError> {
        (**self).save_delivery_state(state).await
    }

    async fn clear_delivery_state(&self, event_id: Uuid) -> Result<(), OutboxStoreError> {
        (**self).clear_delivery_state(event_id).await
    }

    async fn parked(&self) -> Result<Vec<DeliveryState>, OutboxStoreError> {
        (**self).parked().await
    }

    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxStoreError> {
        (**self).requeue(event_id, now).await
    }
}
