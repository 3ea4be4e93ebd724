use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use supplyreg_events::{EventRecord, EventStatus};

use super::r#trait::{DeliveryLog, DeliveryState, OutboxStats, OutboxStore, OutboxStoreError, OutboxWriter};

/// In-memory outbox.
///
/// Intended for tests/dev and for running the relay without a database.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    records: RwLock<HashMap<Uuid, EventRecord>>,
    deliveries: RwLock<HashMap<Uuid, DeliveryState>>,
    unavailable: AtomicBool,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work. Records inserted through it become visible on
    /// [`InMemoryOutboxTx::commit`] and are discarded on rollback or drop.
    pub fn begin(&self) -> InMemoryOutboxTx<'_> {
        InMemoryOutboxTx {
            store: self,
            staged: Vec::new(),
        }
    }

    /// Simulate the backing store going away: every call fails with `Storage`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, event_id: Uuid) -> Option<EventRecord> {
        self.records.read().ok()?.get(&event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), OutboxStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OutboxStoreError::Storage("in-memory outbox marked unavailable".to_string()));
        }
        Ok(())
    }

    fn insert_all(&self, batch: Vec<EventRecord>) -> Result<Vec<EventRecord>, OutboxStoreError> {
        self.check_available()?;
        let mut records = self.records.write().map_err(poisoned)?;

        for record in &batch {
            if records.contains_key(&record.event_id()) {
                return Err(OutboxStoreError::Duplicate(record.event_id()));
            }
        }
        for record in &batch {
            records.insert(record.event_id(), record.clone());
        }
        Ok(batch)
    }
}

fn poisoned<T>(_: T) -> OutboxStoreError {
    OutboxStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save(&self, record: EventRecord) -> Result<EventRecord, OutboxStoreError> {
        let mut saved = self.insert_all(vec![record])?;
        saved
            .pop()
            .ok_or_else(|| OutboxStoreError::Storage("insert returned no record".to_string()))
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>, OutboxStoreError> {
        self.check_available()?;
        let records = self.records.read().map_err(poisoned)?;
        let mut found: Vec<EventRecord> = records
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created().cmp(&b.created()).then(a.event_id().cmp(&b.event_id())));
        Ok(found)
    }

    async fn update_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        self.check_available()?;
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(&event_id)
            .ok_or(OutboxStoreError::NotFound(event_id))?;

        let from = record.status();
        record
            .transition(status, updated)
            .map_err(|_| OutboxStoreError::IllegalTransition {
                event_id,
                from,
                to: status,
            })
    }

    async fn delete_where(
        &self,
        status: EventStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<u64, OutboxStoreError> {
        self.check_available()?;
        let mut records = self.records.write().map_err(poisoned)?;
        let doomed: Vec<Uuid> = records
            .values()
            .filter(|r| r.status() == status && r.updated() < updated_before)
            .map(EventRecord::event_id)
            .collect();

        for id in &doomed {
            records.remove(id);
        }
        drop(records);

        let mut deliveries = self.deliveries.write().map_err(poisoned)?;
        for id in &doomed {
            deliveries.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        self.check_available()?;
        let records = self.records.read().map_err(poisoned)?;
        let mut stats = OutboxStats::default();
        for record in records.values() {
            match record.status() {
                EventStatus::Pending => {
                    stats.pending += 1;
                    stats.oldest_pending_created = Some(match stats.oldest_pending_created {
                        Some(oldest) => oldest.min(record.created()),
                        None => record.created(),
                    });
                }
                EventStatus::Sent => stats.sent += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl DeliveryLog for InMemoryOutboxStore {
    async fn delivery_states(&self) -> Result<HashMap<Uuid, DeliveryState>, OutboxStoreError> {
        self.check_available()?;
        Ok(self.deliveries.read().map_err(poisoned)?.clone())
    }

    async fn save_delivery_state(&self, state: DeliveryState) -> Result<(), OutboxStoreError> {
        self.check_available()?;
        self.deliveries
            .write()
            .map_err(poisoned)?
            .insert(state.event_id, state);
        Ok(())
    }

    async fn clear_delivery_state(&self, event_id: Uuid) -> Result<(), OutboxStoreError> {
        self.check_available()?;
        self.deliveries.write().map_err(poisoned)?.remove(&event_id);
        Ok(())
    }

    async fn parked(&self) -> Result<Vec<DeliveryState>, OutboxStoreError> {
        self.check_available()?;
        let deliveries = self.deliveries.read().map_err(poisoned)?;
        let mut parked: Vec<DeliveryState> = deliveries.values().filter(|d| d.parked).cloned().collect();
        parked.sort_by_key(|d| d.event_id);
        Ok(parked)
    }

    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxStoreError> {
        self.check_available()?;
        let mut deliveries = self.deliveries.write().map_err(poisoned)?;
        match deliveries.get_mut(&event_id) {
            Some(state) if state.parked => {
                state.parked = false;
                state.attempts = 0;
                state.next_attempt_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Unit of work over an [`InMemoryOutboxStore`].
#[derive(Debug)]
pub struct InMemoryOutboxTx<'a> {
    store: &'a InMemoryOutboxStore,
    staged: Vec<EventRecord>,
}

impl InMemoryOutboxTx<'_> {
    pub fn commit(self) -> Result<Vec<EventRecord>, OutboxStoreError> {
        self.store.insert_all(self.staged)
    }

    pub fn rollback(self) {}

    pub fn staged(&self) -> &[EventRecord] {
        &self.staged
    }
}

#[async_trait]
impl OutboxWriter for InMemoryOutboxTx<'_> {
    async fn insert(&mut self, record: EventRecord) -> Result<EventRecord, OutboxStoreError> {
        self.staged.push(record.clone());
        Ok(record)
    }
}
