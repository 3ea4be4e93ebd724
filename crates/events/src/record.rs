//! The outbox record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use supplyreg_core::{AggregateId, DomainError, UserId};

use crate::envelope::Metadata;

/// Discriminator selecting which payload handler owns a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    Product,
    Supplier,
    Agreement,
}

impl AggregateType {
    /// Every tag the registry is expected to cover at startup.
    pub const ALL: [AggregateType; 3] = [
        AggregateType::Product,
        AggregateType::Supplier,
        AggregateType::Agreement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Product => "PRODUCT",
            AggregateType::Supplier => "SUPPLIER",
            AggregateType::Agreement => "AGREEMENT",
        }
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AggregateType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCT" => Ok(AggregateType::Product),
            "SUPPLIER" => Ok(AggregateType::Supplier),
            "AGREEMENT" => Ok(AggregateType::Agreement),
            other => Err(DomainError::validation(format!(
                "unknown aggregate type: {other}"
            ))),
        }
    }
}

/// Delivery status of an outbox record.
///
/// Monotonic: `Pending -> Sent` is the only legal transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Sent,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Sent => "SENT",
        }
    }

    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!((self, next), (EventStatus::Pending, EventStatus::Sent))
    }
}

impl core::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "SENT" => Ok(EventStatus::Sent),
            other => Err(DomainError::validation(format!("unknown event status: {other}"))),
        }
    }
}

/// An outbox entry: one per enqueue call.
///
/// Notes:
/// - `event_id` doubles as the downstream idempotency key.
/// - `payload` is a serialized snapshot of the domain DTO taken at enqueue time;
///   later changes to the aggregate never reach an already-enqueued record.
/// - Only `status` and `updated` ever change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: AggregateType,
    status: EventStatus,
    event_name: String,
    by_user: UserId,
    extra_metadata: Metadata,
    payload: JsonValue,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl EventRecord {
    /// Build a fresh `PENDING` record with a new time-ordered `event_id`.
    pub fn pending(
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        by_user: UserId,
        event_name: impl Into<String>,
        payload: JsonValue,
        extra_metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type,
            status: EventStatus::Pending,
            event_name: event_name.into(),
            by_user,
            extra_metadata,
            payload,
            created: now,
            updated: now,
        }
    }

    /// Rebuild a record from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: AggregateType,
        status: EventStatus,
        event_name: String,
        by_user: UserId,
        extra_metadata: Metadata,
        payload: JsonValue,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type,
            status,
            event_name,
            by_user,
            extra_metadata,
            payload,
            created,
            updated,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn by_user(&self) -> UserId {
        self.by_user
    }

    pub fn extra_metadata(&self) -> &Metadata {
        &self.extra_metadata
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Apply a status transition, refreshing `updated`.
    pub fn transition(&mut self, next: EventStatus, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::conflict(format!(
                "illegal status transition {} -> {} for event {}",
                self.status, next, self.event_id
            )));
        }
        self.status = next;
        self.updated = at;
        Ok(())
    }
}
