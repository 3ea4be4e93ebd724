//! Dispatch loop: drains `PENDING` records to the bus, one record at a time.
//!
//! A pass (tick) runs only on the leader. It loads every pending record,
//! orders it by `created` (ties broken by `event_id`, which is time-ordered),
//! and for each one that is due:
//!
//! 1. resolves the payload handler for the record's aggregate type,
//! 2. turns the stored snapshot into the wire DTO and partition key,
//! 3. pushes the envelope with the merged metadata,
//! 4. marks the record `SENT` only after the broker acknowledged it.
//!
//! A failing record is logged, its delivery state is advanced per the
//! [`RetryPolicy`], and the pass moves on. A failing store aborts the pass;
//! whatever was not marked `SENT` stays `PENDING` for the next one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use supplyreg_events::{
    EventRecord, EventStatus, HandlerError, LeaderGate, PayloadRegistry, RegistryError, merge_metadata,
};

use crate::broker::BrokerClient;
use crate::outbox::{DeliveryLog, DeliveryState, OutboxStore, OutboxStoreError};
use crate::push::{BusPushAdapter, PushError};
use crate::retry::RetryPolicy;
use crate::scheduler::PeriodicJob;

/// Why a single record could not be delivered.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    MissingHandler(#[from] RegistryError),

    #[error(transparent)]
    Payload(#[from] HandlerError),

    #[error(transparent)]
    Push(#[from] PushError),
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub considered: usize,
    pub sent: usize,
    pub failed: usize,
    pub deferred: usize,
    pub parked: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Not the leader; nothing was read or written.
    Skipped,
    Completed(DispatchReport),
    /// The store failed mid-pass. Records after the failure were not touched.
    Aborted {
        report: DispatchReport,
        error: OutboxStoreError,
    },
}

impl TickOutcome {
    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            TickOutcome::Skipped => None,
            TickOutcome::Completed(report) | TickOutcome::Aborted { report, .. } => Some(report),
        }
    }
}

pub struct OutboxDispatcher<S, C, G> {
    store: S,
    registry: PayloadRegistry,
    push: BusPushAdapter<C>,
    leader: G,
    retry: RetryPolicy,
}

impl<S, C, G> OutboxDispatcher<S, C, G>
where
    S: OutboxStore + DeliveryLog,
    C: BrokerClient,
    G: LeaderGate,
{
    pub fn new(store: S, registry: PayloadRegistry, push: BusPushAdapter<C>, leader: G) -> Self {
        Self {
            store,
            registry,
            push,
            leader,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// One pass with `now` as the clock for due checks and `updated` stamps.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.leader.is_leader() {
            debug!("not the leader; skipping dispatch tick");
            return TickOutcome::Skipped;
        }

        let mut report = DispatchReport::default();

        let mut pending = match self.store.find_by_status(EventStatus::Pending).await {
            Ok(records) => records,
            Err(error) => {
                error!(error = %error, "dispatch tick aborted: could not load pending records");
                return TickOutcome::Aborted { report, error };
            }
        };
        pending.sort_by(|a, b| a.created().cmp(&b.created()).then(a.event_id().cmp(&b.event_id())));

        let mut deliveries = match self.store.delivery_states().await {
            Ok(states) => states,
            Err(error) => {
                error!(error = %error, "dispatch tick aborted: could not load delivery states");
                return TickOutcome::Aborted { report, error };
            }
        };

        report.considered = pending.len();

        for record in &pending {
            let previous = deliveries.remove(&record.event_id());
            if let Some(state) = &previous {
                if !state.is_due(now) {
                    report.deferred += 1;
                    continue;
                }
            }

            let step = match self.deliver(record).await {
                Ok(()) => self.mark_sent(record, previous.is_some(), now, &mut report).await,
                Err(err) => self.mark_failed(record, previous.as_ref(), err, now, &mut report).await,
            };

            if let Err(error) = step {
                error!(
                    error = %error,
                    event_id = %record.event_id(),
                    "dispatch tick aborted: outbox store failed"
                );
                return TickOutcome::Aborted { report, error };
            }
        }

        if report.considered > 0 {
            info!(
                considered = report.considered,
                sent = report.sent,
                failed = report.failed,
                deferred = report.deferred,
                parked = report.parked,
                "dispatch tick complete"
            );
        }
        TickOutcome::Completed(report)
    }

    async fn deliver(&self, record: &EventRecord) -> Result<(), DispatchError> {
        let handler = self.registry.resolve(record.aggregate_type())?;
        let prepared = handler.prepare(record.payload())?;
        let metadata = merge_metadata(self.push.producer_id(), prepared.dto_version, record.extra_metadata());

        self.push
            .push(
                &prepared.partition_key,
                record.event_name(),
                prepared.payload,
                metadata,
                record.event_id(),
            )
            .await?;
        Ok(())
    }

    async fn mark_sent(
        &self,
        record: &EventRecord,
        had_failures: bool,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), OutboxStoreError> {
        match self
            .store
            .update_status(record.event_id(), EventStatus::Sent, now)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                // Pushed but could not be marked; consumers dedupe on event_id.
                warn!(error = %e, event_id = %record.event_id(), "pushed record could not be marked sent");
                report.failed += 1;
                return Ok(());
            }
        }

        report.sent += 1;
        if had_failures {
            match self.store.clear_delivery_state(record.event_id()).await {
                Ok(()) => {}
                Err(e) if e.is_unavailable() => return Err(e),
                // Stale bookkeeping on a SENT record is never read again.
                Err(e) => warn!(error = %e, event_id = %record.event_id(), "could not clear delivery state"),
            }
        }
        debug!(event_id = %record.event_id(), aggregate_type = %record.aggregate_type(), "record sent");
        Ok(())
    }

    async fn mark_failed(
        &self,
        record: &EventRecord,
        previous: Option<&DeliveryState>,
        err: DispatchError,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), OutboxStoreError> {
        report.failed += 1;
        let state = self.retry.record_failure(previous, record.event_id(), err.to_string(), now);

        match &err {
            DispatchError::MissingHandler(_) | DispatchError::Payload(_) => error!(
                error = %err,
                event_id = %record.event_id(),
                aggregate_type = %record.aggregate_type(),
                attempts = state.attempts,
                "record cannot be turned into a wire message"
            ),
            DispatchError::Push(_) => warn!(
                error = %err,
                event_id = %record.event_id(),
                attempts = state.attempts,
                next_attempt_at = %state.next_attempt_at,
                "push failed; record stays pending"
            ),
        }

        if state.parked {
            report.parked += 1;
            error!(
                event_id = %record.event_id(),
                attempts = state.attempts,
                "record parked after exhausting retries; requeue to resume"
            );
        }

        match self.store.save_delivery_state(state).await {
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!(error = %e, event_id = %record.event_id(), "could not save delivery state; retrying on next tick");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl<S, C, G> PeriodicJob for OutboxDispatcher<S, C, G>
where
    S: OutboxStore + DeliveryLog + 'static,
    C: BrokerClient + 'static,
    G: LeaderGate + 'static,
{
    fn name(&self) -> &'static str {
        "outbox-dispatch"
    }

    async fn run_tick(&self) {
        let _ = self.tick().await;
    }
}
