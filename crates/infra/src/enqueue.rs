//! Enqueue service: called by business operations inside their own
//! transaction, right next to the write the event describes.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use supplyreg_core::{AggregateId, UserId};
use supplyreg_events::{AggregateType, EventRecord, Metadata, PayloadRegistry};

use crate::outbox::{OutboxStoreError, OutboxWriter};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("invalid outbox event: {0}")]
    Invalid(String),

    #[error("no payload handler registered for {0}")]
    UnknownAggregateType(AggregateType),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] OutboxStoreError),
}

/// Everything an enqueue call needs besides the transaction.
#[derive(Debug, Clone)]
pub struct EnqueueRequest<'a, T: ?Sized> {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub by_user: UserId,
    pub event_name: &'a str,
    pub payload: &'a T,
    pub extra_metadata: Metadata,
}

impl<'a, T: Serialize + ?Sized> EnqueueRequest<'a, T> {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        by_user: UserId,
        event_name: &'a str,
        payload: &'a T,
    ) -> Self {
        Self {
            aggregate_type,
            aggregate_id,
            by_user,
            event_name,
            payload,
            extra_metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }
}

/// Snapshots a domain DTO into a new `PENDING` record.
///
/// The service never opens or commits a transaction; a failure here is
/// returned to the caller, whose transaction then rolls back the business
/// write too.
#[derive(Debug, Clone)]
pub struct EnqueueService {
    registry: PayloadRegistry,
}

impl EnqueueService {
    pub fn new(registry: PayloadRegistry) -> Self {
        Self { registry }
    }

    #[instrument(
        skip(self, writer, request),
        fields(aggregate_type = %request.aggregate_type, aggregate_id = %request.aggregate_id, event_name = %request.event_name),
        err
    )]
    pub async fn enqueue<W, T>(
        &self,
        writer: &mut W,
        request: EnqueueRequest<'_, T>,
    ) -> Result<EventRecord, EnqueueError>
    where
        W: OutboxWriter + ?Sized,
        T: Serialize + ?Sized,
    {
        if request.event_name.trim().is_empty() {
            return Err(EnqueueError::Invalid("event name cannot be empty".to_string()));
        }
        if !self.registry.contains(request.aggregate_type) {
            return Err(EnqueueError::UnknownAggregateType(request.aggregate_type));
        }

        let payload = serde_json::to_value(request.payload)?;
        let record = EventRecord::pending(
            request.aggregate_type,
            request.aggregate_id,
            request.by_user,
            request.event_name,
            payload,
            request.extra_metadata,
            Utc::now(),
        );

        let saved = writer.insert(record).await?;
        debug!(event_id = %saved.event_id(), "outbox record enqueued");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::outbox::InMemoryOutboxStore;
    use supplyreg_events::EventStatus;
    use supplyreg_parties::SupplierHandler;

    fn service() -> EnqueueService {
        let mut builder = PayloadRegistry::builder();
        builder.register(SupplierHandler).unwrap();
        EnqueueService::new(builder.build())
    }

    #[tokio::test]
    async fn enqueue_snapshots_payload_as_pending() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let svc = service();
        let mut dto = json!({ "legalName": "ACME" });
        let aggregate_id = AggregateId::new();

        let mut tx = store.begin();
        let rec = svc
            .enqueue(
                &mut tx,
                EnqueueRequest::new(AggregateType::Supplier, aggregate_id, UserId::new(), "registered", &dto)
                    .with_metadata("traceId", "abc"),
            )
            .await
            .unwrap();
        tx.commit().unwrap();

        dto["legalName"] = json!("Changed later");

        let stored = store.get(rec.event_id()).unwrap();
        assert_eq!(stored.status(), EventStatus::Pending);
        assert_eq!(stored.payload()["legalName"], "ACME");
        assert_eq!(stored.aggregate_id(), aggregate_id);
        assert_eq!(stored.extra_metadata()["traceId"], "abc");
        assert_eq!(stored.created(), stored.updated());
    }

    #[tokio::test]
    async fn empty_event_name_is_rejected_before_writing() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        let err = service()
            .enqueue(
                &mut tx,
                EnqueueRequest::new(AggregateType::Supplier, AggregateId::new(), UserId::new(), "  ", &json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Invalid(_)));
        assert!(tx.staged().is_empty());
    }

    #[tokio::test]
    async fn unregistered_aggregate_type_is_rejected() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        let err = service()
            .enqueue(
                &mut tx,
                EnqueueRequest::new(AggregateType::Product, AggregateId::new(), UserId::new(), "registered", &json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::UnknownAggregateType(AggregateType::Product)));
    }

    #[tokio::test]
    async fn every_call_gets_a_fresh_event_id() {
        let store = InMemoryOutboxStore::new();
        let svc = service();
        let id = AggregateId::new();
        let user = UserId::new();
        let payload = json!({ "v": 1 });

        let mut tx = store.begin();
        let a = svc
            .enqueue(&mut tx, EnqueueRequest::new(AggregateType::Supplier, id, user, "updated", &payload))
            .await
            .unwrap();
        let b = svc
            .enqueue(&mut tx, EnqueueRequest::new(AggregateType::Supplier, id, user, "updated", &payload))
            .await
            .unwrap();
        tx.commit().unwrap();

        assert_ne!(a.event_id(), b.event_id());
        assert_eq!(store.len(), 2);
    }
}
