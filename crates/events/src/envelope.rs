//! On-wire envelope handed to the broker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Ordered string -> value metadata map.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Metadata key carrying the producing service identity.
pub const PRODUCER_ID_KEY: &str = "producerId";

/// Metadata key carrying the schema version of the wire DTO.
pub const DTO_VERSION_KEY: &str = "dtoVersion";

/// Envelope published to the external bus.
///
/// `event_id` is the idempotency key: consumers drop envelopes whose id they
/// have already processed, which is what makes at-least-once delivery safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub routing_key: String,
    pub event_name: String,
    pub payload: JsonValue,
    pub metadata: Metadata,
    pub event_id: Uuid,
}

impl WireEnvelope {
    pub fn new(
        routing_key: impl Into<String>,
        event_name: impl Into<String>,
        payload: JsonValue,
        metadata: Metadata,
        event_id: Uuid,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            event_name: event_name.into(),
            payload,
            metadata,
            event_id,
        }
    }

    pub fn producer_id(&self) -> Option<&str> {
        self.metadata.get(PRODUCER_ID_KEY).and_then(JsonValue::as_str)
    }
}

/// Merge the standard producer metadata with a record's extra metadata.
///
/// `producerId` and `dtoVersion` are reserved: extra entries using those keys
/// are dropped (and logged) so a record cannot spoof the producer identity.
pub fn merge_metadata(producer_id: &str, dto_version: u32, extra: &Metadata) -> Metadata {
    let mut merged = Metadata::new();
    merged.insert(PRODUCER_ID_KEY.to_string(), JsonValue::from(producer_id));
    merged.insert(DTO_VERSION_KEY.to_string(), JsonValue::from(dto_version));

    for (key, value) in extra {
        if key == PRODUCER_ID_KEY || key == DTO_VERSION_KEY {
            tracing::warn!(key = %key, "ignoring reserved key in extra metadata");
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    merged
}
