use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use supplyreg_events::WireEnvelope;

use super::{BrokerClient, BrokerError};

/// In-process broker that records every acknowledged envelope.
///
/// Failures and latency can be injected per event id, which is what the
/// dispatch tests drive.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    published: Mutex<Vec<WireEnvelope>>,
    failing: Mutex<HashSet<Uuid>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send for `event_id` until [`InMemoryBroker::recover`].
    pub fn fail_for(&self, event_id: Uuid) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(event_id);
        }
    }

    pub fn recover(&self, event_id: Uuid) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&event_id);
        }
    }

    /// Delay every send by `latency` before acknowledging.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut l) = self.latency.lock() {
            *l = latency;
        }
    }

    pub fn published(&self) -> Vec<WireEnvelope> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn published_ids(&self) -> Vec<Uuid> {
        self.published().iter().map(|e| e.event_id).collect()
    }

    pub fn count_for(&self, event_id: Uuid) -> usize {
        self.published().iter().filter(|e| e.event_id == event_id).count()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn send(&self, envelope: &WireEnvelope) -> Result<(), BrokerError> {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&envelope.event_id))
            .unwrap_or(false);
        if failing {
            return Err(BrokerError::Rejected(format!(
                "injected failure for {}",
                envelope.event_id
            )));
        }

        self.published
            .lock()
            .map_err(|_| BrokerError::Connection("broker lock poisoned".to_string()))?
            .push(envelope.clone());
        Ok(())
    }
}
