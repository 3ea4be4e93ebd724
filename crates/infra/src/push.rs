//! Bus push adapter: the only way a record leaves the process.

use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use supplyreg_events::{Metadata, WireEnvelope};

use crate::broker::{BrokerClient, BrokerError};

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Wraps a [`BrokerClient`] with the producer identity and a bounded wait.
///
/// A successful `push` means the broker acknowledged the envelope; callers
/// must not assume anything beyond that.
#[derive(Debug, Clone)]
pub struct BusPushAdapter<C> {
    client: C,
    producer_id: String,
    timeout: Duration,
}

impl<C> BusPushAdapter<C>
where
    C: BrokerClient,
{
    pub fn new(client: C, producer_id: impl Into<String>) -> Self {
        Self {
            client,
            producer_id: producer_id.into(),
            timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    #[instrument(skip(self, payload, metadata), fields(routing_key = %routing_key, event_id = %event_id), err)]
    pub async fn push(
        &self,
        routing_key: &str,
        event_name: &str,
        payload: JsonValue,
        metadata: Metadata,
        event_id: Uuid,
    ) -> Result<(), PushError> {
        let envelope = WireEnvelope::new(routing_key, event_name, payload, metadata, event_id);

        match tokio::time::timeout(self.timeout, self.client.send(&envelope)).await {
            Ok(result) => {
                result?;
                debug!(event_name, "envelope acknowledged");
                Ok(())
            }
            Err(_) => Err(PushError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::broker::InMemoryBroker;
    use supplyreg_events::merge_metadata;

    #[tokio::test]
    async fn push_forwards_envelope_verbatim() {
        let broker = Arc::new(InMemoryBroker::new());
        let adapter = BusPushAdapter::new(broker.clone(), "supplyreg-registry");
        let id = Uuid::now_v7();
        let metadata = merge_metadata(adapter.producer_id(), 2, &Metadata::new());

        adapter
            .push("4006381333931", "approved", json!({ "approved": true }), metadata, id)
            .await
            .unwrap();

        let sent = broker.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].routing_key, "4006381333931");
        assert_eq!(sent[0].event_id, id);
        assert_eq!(sent[0].producer_id(), Some("supplyreg-registry"));
    }

    #[tokio::test]
    async fn broker_rejection_surfaces_as_push_error() {
        let broker = Arc::new(InMemoryBroker::new());
        let adapter = BusPushAdapter::new(broker.clone(), "p");
        let id = Uuid::now_v7();
        broker.fail_for(id);

        let err = adapter
            .push("k", "registered", json!({}), Metadata::new(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Broker(BrokerError::Rejected(_))));
        assert!(broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_broker_times_out() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_latency(Some(Duration::from_secs(30)));
        let adapter = BusPushAdapter::new(broker.clone(), "p").with_timeout(Duration::from_secs(10));

        let err = adapter
            .push("k", "registered", json!({}), Metadata::new(), Uuid::now_v7())
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Timeout(Duration::from_secs(10)));
        assert!(broker.published().is_empty());
    }
}
